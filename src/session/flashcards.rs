//! Flashcards session
//!
//! Browse cards one at a time, or sort them into "know" and "still
//! learning" piles. Sorting records correctness 1 / -1 in Flashcards mode
//! for signed-in viewers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::order::starred_only;
use super::saves::{Persister, SaveTracker};
use super::{persist_progress, sides, SessionCore, SessionError, SessionPhase};
use crate::gateway::{Gateway, PutStudiableTerm};
use crate::hydrate::{SetData, StudyPreferences};
use crate::sets::{AnswerMode, StudyMode, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardsSummary {
    pub known: usize,
    pub still_learning: usize,
    pub still_learning_ids: Vec<String>,
}

pub struct FlashcardsSession<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    core: SessionCore,
    persister: Persister,
    settle_timeout: Duration,
    experience_id: Option<String>,
    terms: HashMap<String, Term>,
    answer_with: AnswerMode,
    sorting: bool,
    known: Vec<String>,
    still_learning: Vec<String>,
}

impl<G: Gateway + ?Sized + 'static> FlashcardsSession<G> {
    pub fn new(gateway: Arc<G>, settle_timeout: Duration) -> Self {
        Self {
            gateway,
            core: SessionCore::new(),
            persister: Persister::new(SaveTracker::new()),
            settle_timeout,
            experience_id: None,
            terms: HashMap::new(),
            answer_with: AnswerMode::default(),
            sorting: false,
            known: Vec::new(),
            still_learning: Vec::new(),
        }
    }

    /// Build the pile from hydrated data. When sorting, cards already
    /// sorted in an earlier visit are left out; a fully sorted set starts
    /// over.
    pub fn initialize(&mut self, data: &SetData, prefs: &StudyPreferences) {
        let set = &data.data.set;
        self.terms = set.terms.iter().map(|t| (t.id.clone(), t.clone())).collect();
        self.experience_id = data.experience_id().map(str::to_string);
        self.answer_with = prefs.cards_answer_with;
        self.sorting = prefs.enable_cards_sorting;
        self.known.clear();
        self.still_learning.clear();

        let mut base = set.term_order();
        if prefs.cards_study_starred {
            base = starred_only(&base, &prefs.starred_terms);
        }

        if let (true, Some(injected)) = (self.sorting, &data.injected) {
            for record in &injected.studiable_flashcard_terms {
                if !base.contains(&record.term_id) {
                    continue;
                }
                if record.correctness > 0 {
                    self.known.push(record.term_id.clone());
                } else if record.correctness < 0 {
                    self.still_learning.push(record.term_id.clone());
                }
            }
            let remaining: Vec<String> = base
                .iter()
                .filter(|id| !self.known.contains(id) && !self.still_learning.contains(id))
                .cloned()
                .collect();
            if remaining.is_empty() {
                self.known.clear();
                self.still_learning.clear();
            } else {
                base = remaining;
            }
        }

        self.core.initialize(base, prefs.shuffle_flashcards);
        log::info!(
            "session: flashcards for {} ({} cards, sorting {})",
            set.id,
            self.core.order().len(),
            self.sorting
        );
    }

    /// Resync after a refetch without restarting the session
    pub fn apply_preferences(&mut self, prefs: &StudyPreferences) {
        self.core.set_shuffle(prefs.shuffle_flashcards);
        self.answer_with = prefs.cards_answer_with;
        self.sorting = prefs.enable_cards_sorting;
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.core.set_shuffle(enabled);
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.phase()
    }

    pub fn order(&self) -> &[String] {
        self.core.order().working()
    }

    pub fn index(&self) -> usize {
        self.core.progress()
    }

    pub fn len(&self) -> usize {
        self.core.order().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.order().is_empty()
    }

    pub fn is_sorting(&self) -> bool {
        self.sorting
    }

    pub fn current(&self) -> Option<&Term> {
        self.order()
            .get(self.core.progress())
            .and_then(|id| self.terms.get(id))
    }

    /// Front and back of the current card
    pub fn current_sides(&self) -> Option<(&str, &str)> {
        self.current().map(|term| sides(term, self.answer_with))
    }

    pub fn next(&mut self) -> Result<(), SessionError> {
        self.core.ensure_active()?;
        let last = self.len().saturating_sub(1);
        self.core.set_progress((self.core.progress() + 1).min(last));
        Ok(())
    }

    pub fn prev(&mut self) -> Result<(), SessionError> {
        self.core.ensure_active()?;
        self.core.set_progress(self.core.progress().saturating_sub(1));
        Ok(())
    }

    pub fn know(&mut self) -> Result<(), SessionError> {
        self.sort(1)
    }

    pub fn still_learning(&mut self) -> Result<(), SessionError> {
        self.sort(-1)
    }

    fn sort(&mut self, correctness: i32) -> Result<(), SessionError> {
        self.core.ensure_active()?;
        if !self.sorting {
            return Err(SessionError::SortingDisabled);
        }
        let term_id = self
            .order()
            .get(self.core.progress())
            .cloned()
            .ok_or(SessionError::RoundFinished)?;

        if correctness > 0 {
            self.known.push(term_id.clone());
        } else {
            self.still_learning.push(term_id.clone());
        }
        self.core.set_progress(self.core.progress() + 1);

        if let Some(experience_id) = &self.experience_id {
            persist_progress(
                &self.gateway,
                &self.persister,
                PutStudiableTerm {
                    id: term_id,
                    experience_id: experience_id.clone(),
                    mode: StudyMode::Flashcards,
                    correctness,
                    appeared_in_round: Some(self.core.round()),
                },
            );
        }
        Ok(())
    }

    /// Every card of the pile has been sorted
    pub fn is_pile_done(&self) -> bool {
        self.core.progress() >= self.len()
    }

    pub fn summary(&self) -> FlashcardsSummary {
        FlashcardsSummary {
            known: self.known.len(),
            still_learning: self.still_learning.len(),
            still_learning_ids: self.still_learning.clone(),
        }
    }

    pub fn tracker(&self) -> &SaveTracker {
        self.persister.tracker()
    }

    pub async fn complete(&mut self) -> Result<FlashcardsSummary, SessionError> {
        self.core.begin_submit()?;
        self.core
            .finish_submit(&self.persister, self.settle_timeout)
            .await?;
        Ok(self.summary())
    }

    /// Start another pass over the cards still being learned, or over the
    /// whole set when none are left
    pub fn restart_still_learning(&mut self) -> Result<(), SessionError> {
        if self.core.phase() == SessionPhase::Initializing {
            return Err(SessionError::NotReady);
        }

        let pile = if self.still_learning.is_empty() {
            self.core.order().base().to_vec()
        } else {
            std::mem::take(&mut self.still_learning)
        };
        self.known.clear();
        self.still_learning.clear();

        let shuffle = self.core.order().is_shuffled();
        self.core.restart(pile, shuffle);
        Ok(())
    }
}
