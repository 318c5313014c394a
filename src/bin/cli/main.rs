mod app;
mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "studyset-cli", about = "Study set client", version)]
struct Cli {
    /// Config file (default: <config dir>/studyset/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve requests from a JSON database file instead of the web backend
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Viewer id when using --fixture (signed out when omitted)
    #[arg(long, global = true, requires = "fixture")]
    user: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show a study set and its terms
    Show {
        /// Study set id
        set: String,
    },

    /// List recently viewed study sets or folders
    Recent {
        /// List folders instead of study sets
        #[arg(long)]
        folders: bool,
        /// Ids to leave out (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Print the flashcards of a study set in study order
    Cards {
        /// Study set id
        set: String,
        /// Shuffle regardless of the saved preference
        #[arg(long)]
        shuffle: bool,
    },

    /// Manage the sign-up whitelist (admin only)
    #[command(subcommand)]
    Whitelist(WhitelistCommand),
}

#[derive(Subcommand)]
enum WhitelistCommand {
    /// List whitelisted emails and failed login attempts
    List,

    /// Whitelist an email address
    Add { email: String },

    /// Remove an email address from the whitelist
    Remove { email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let app = app::App::new(cli.config.as_deref(), cli.fixture.as_deref(), cli.user.as_deref())?;

    match cli.command {
        Command::Show { set } => {
            commands::show::run(&app, &set, &cli.format, use_color).await?;
        }
        Command::Recent { folders, exclude } => {
            commands::recent::run(&app, folders, &exclude, &cli.format, use_color).await?;
        }
        Command::Cards { set, shuffle } => {
            commands::cards::run(&app, &set, shuffle, &cli.format, use_color).await?;
        }
        Command::Whitelist(subcmd) => match subcmd {
            WhitelistCommand::List => {
                commands::whitelist::run_list(&app, &cli.format, use_color).await?;
            }
            WhitelistCommand::Add { email } => {
                commands::whitelist::run_update(&app, &email, false, &cli.format).await?;
            }
            WhitelistCommand::Remove { email } => {
                commands::whitelist::run_update(&app, &email, true, &cli.format).await?;
            }
        },
    }

    Ok(())
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
