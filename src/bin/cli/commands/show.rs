use anyhow::Result;
use futures_util::future::join;

use studyset_lib::hydrate::{PreferenceStore, SetHydrator};
use studyset_lib::sets::EnabledFeatures;

use crate::app::App;
use crate::render::terminal::{format_time, paint, rule, truncate, visibility_label, Color};
use crate::OutputFormat;

pub async fn run(app: &App, set_id: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    // Viewer flags only matter (and only resolve) when signed in
    let (loaded, flags) = if app.signed_in() {
        let (loaded, flags) = join(app.load_set(set_id), app.gateway.viewer_flags()).await;
        (loaded, flags.unwrap_or_else(|e| {
            log::warn!("gateway: could not read viewer flags: {}", e);
            EnabledFeatures::empty()
        }))
    } else {
        (app.load_set(set_id).await, EnabledFeatures::empty())
    };
    let (hydrator, data) = loaded?;

    let store = PreferenceStore::new(flags);
    let _follow = store.follow(&hydrator);
    let prefs = store.get();
    let set = &data.data.set;

    match format {
        OutputFormat::Json => {
            let preferences = if data.authed { Some(&prefs) } else { None };
            let output = serde_json::json!({
                "set": &data.data,
                "preferences": preferences,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", paint(&set.title, Color::BOLD, use_color));
            if !set.description.is_empty() {
                println!("{}", set.description);
            }
            println!(
                "{}",
                paint(
                    &format!(
                        "{} · {} terms · {} → {} · created {}",
                        visibility_label(set.visibility),
                        set.terms.len(),
                        set.word_language,
                        set.definition_language,
                        format_time(set.created_at)
                    ),
                    Color::DIM,
                    use_color
                )
            );
            if !set.tags.is_empty() {
                println!("{}", paint(&format!("#{}", set.tags.join(" #")), Color::CYAN, use_color));
            }
            println!();

            print_terms(&hydrator, &prefs.starred_terms, use_color);

            if let Some(injected) = &data.injected {
                println!(
                    "\n{} learn and {} flashcard progress records",
                    injected.studiable_learn_terms.len(),
                    injected.studiable_flashcard_terms.len()
                );
            }
        }
    }

    Ok(())
}

fn print_terms<G>(hydrator: &SetHydrator<G>, starred: &[String], use_color: bool)
where
    G: studyset_lib::gateway::Gateway + ?Sized,
{
    let Some(data) = hydrator.data() else {
        return;
    };
    let set = &data.data.set;
    let width = set
        .terms
        .iter()
        .map(|t| t.word.chars().count())
        .max()
        .unwrap_or(4)
        .clamp(4, 32);

    println!("  {:<width$} Definition", "Word", width = width);
    println!("  {} {}", rule(width), rule(10));
    for id in set.term_order() {
        let Some(term) = set.term(&id) else {
            continue;
        };
        let marker = if starred.contains(&term.id) {
            paint("*", Color::YELLOW, use_color)
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<width$} {}",
            marker,
            truncate(&term.word, width),
            term.definition,
            width = width
        );
    }
}
