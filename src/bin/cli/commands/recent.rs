use anyhow::{Context, Result};

use studyset_lib::sets::EntityKind;

use crate::app::App;
use crate::render::terminal::{format_time, paint, rule, truncate, visibility_label, Color};
use crate::OutputFormat;

pub async fn run(
    app: &App,
    folders: bool,
    exclude: &[String],
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    if !app.signed_in() {
        anyhow::bail!("Recent items need a signed-in viewer (set session_token or pass --user)");
    }

    let kind = if folders {
        EntityKind::Folder
    } else {
        EntityKind::StudySet
    };
    let entities = app
        .gateway
        .recent(kind, exclude)
        .await
        .context("Failed to load recent items")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        OutputFormat::Plain => {
            if entities.is_empty() {
                println!("Nothing viewed yet.");
                return Ok(());
            }

            let width = entities
                .iter()
                .map(|e| e.title.chars().count())
                .max()
                .unwrap_or(5)
                .clamp(5, 40);
            println!("{:<width$} {:<8} {:>5}  Viewed", "Title", "Access", "Items", width = width);
            println!("{} {} {}  {}", rule(width), rule(8), rule(5), rule(16));

            for entity in &entities {
                let access = entity.visibility.map(visibility_label).unwrap_or("-");
                println!(
                    "{:<width$} {:<8} {:>5}  {}",
                    truncate(&entity.title, width),
                    access,
                    entity.item_count,
                    paint(&format_time(entity.viewed_at), Color::DIM, use_color),
                    width = width
                );
            }

            println!("\n{} {} total", entities.len(), if folders { "folders" } else { "sets" });
        }
    }

    Ok(())
}
