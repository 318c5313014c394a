use anyhow::{Context, Result};

use studyset_lib::gateway::validate_email;

use crate::app::App;
use crate::render::terminal::{format_time, paint, rule, Color};
use crate::OutputFormat;

pub async fn run_list(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let whitelist = app
        .gateway
        .get_whitelist()
        .await
        .context("Failed to load the whitelist")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&whitelist)?);
        }
        OutputFormat::Plain => {
            println!("{}", paint("Whitelisted", Color::BOLD, use_color));
            if whitelist.whitelist.is_empty() {
                println!("  (none)");
            }
            for entry in &whitelist.whitelist {
                println!("  {:<40} {}", entry.email, format_time(entry.created_at));
            }

            if !whitelist.attempts.is_empty() {
                println!("\n{}", paint("Failed logins", Color::BOLD, use_color));
                println!("  {} {}", rule(40), rule(16));
                for attempt in &whitelist.attempts {
                    println!(
                        "  {:<40} {}",
                        attempt.email,
                        paint(&format_time(attempt.attempted_at), Color::YELLOW, use_color)
                    );
                }
            }
        }
    }

    Ok(())
}

pub async fn run_update(app: &App, email: &str, delete: bool, format: &OutputFormat) -> Result<()> {
    validate_email(email).with_context(|| format!("'{}' is not a valid email address", email))?;
    app.gateway
        .whitelist_email(email, delete)
        .await
        .context("Failed to update the whitelist")?;
    app.persist()?;

    let action = if delete { "removed" } else { "whitelisted" };
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({ "email": email, "action": action });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => println!("{} {}", email, action),
    }
    Ok(())
}
