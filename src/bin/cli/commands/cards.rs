use anyhow::Result;

use studyset_lib::hydrate::PreferenceStore;
use studyset_lib::sets::EnabledFeatures;
use studyset_lib::session::FlashcardsSession;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub async fn run(app: &App, set_id: &str, shuffle: bool, format: &OutputFormat, use_color: bool) -> Result<()> {
    let (hydrator, data) = app.load_set(set_id).await?;

    let store = PreferenceStore::new(EnabledFeatures::empty());
    let _follow = store.follow(&hydrator);
    let mut prefs = store.get();
    prefs.shuffle_flashcards |= shuffle;
    // Printing the whole pile; sorting progress is not resumed here
    prefs.enable_cards_sorting = false;

    let mut session = FlashcardsSession::new(app.gateway.clone(), app.config.save_settle_timeout());
    session.initialize(&data, &prefs);

    let mut cards = Vec::with_capacity(session.len());
    while let Some((front, back)) = session.current_sides() {
        cards.push((front.to_string(), back.to_string()));
        if session.index() + 1 >= session.len() {
            break;
        }
        session.next()?;
    }

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = cards
                .iter()
                .map(|(front, back)| serde_json::json!({ "front": front, "back": back }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if cards.is_empty() {
                println!("No cards in this set.");
                return Ok(());
            }
            for (i, (front, back)) in cards.iter().enumerate() {
                println!("{:>3}. {}", i + 1, paint(front, Color::BOLD, use_color));
                println!("     {}", paint(back, Color::GREEN, use_color));
            }
        }
    }

    Ok(())
}
