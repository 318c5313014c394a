//! Per-set study preferences, kept in sync with hydrated container data

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::listeners::Subscription;
use super::{SetData, SetHydrator};
use crate::gateway::Gateway;
use crate::sets::{AnswerMode, Container, EnabledFeatures, MultipleAnswerMode};

/// Study preferences taken from a container
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPreferences {
    pub shuffle_flashcards: bool,
    pub shuffle_learn: bool,
    pub study_starred: bool,
    pub answer_with: AnswerMode,
    pub starred_terms: Vec<String>,
    pub multiple_answer_mode: MultipleAnswerMode,
    pub extended_feedback_bank: bool,
    pub enable_cards_sorting: bool,
    pub cards_study_starred: bool,
    pub cards_answer_with: AnswerMode,
    pub match_study_starred: bool,
}

impl StudyPreferences {
    /// The extended feedback bank also needs the viewer's feature flag
    pub fn from_container(container: &Container, features: EnabledFeatures) -> Self {
        Self {
            shuffle_flashcards: container.shuffle_flashcards,
            shuffle_learn: container.shuffle_learn,
            study_starred: container.study_starred,
            answer_with: container.answer_with,
            starred_terms: container.starred_terms.clone(),
            multiple_answer_mode: container.multiple_answer_mode,
            extended_feedback_bank: container.extended_feedback_bank
                && features.contains(EnabledFeatures::EXTENDED_FEEDBACK_BANK),
            enable_cards_sorting: container.enable_cards_sorting,
            cards_study_starred: container.cards_study_starred,
            cards_answer_with: container.cards_answer_with,
            match_study_starred: container.match_study_starred,
        }
    }
}

/// Shared preference state for the active set
#[derive(Clone, Default)]
pub struct PreferenceStore {
    inner: Arc<RwLock<StudyPreferences>>,
    features: EnabledFeatures,
}

impl PreferenceStore {
    pub fn new(features: EnabledFeatures) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StudyPreferences::default())),
            features,
        }
    }

    pub fn get(&self) -> StudyPreferences {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Local preference change; the last write wins
    pub fn update(&self, f: impl FnOnce(&mut StudyPreferences)) {
        let mut prefs = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut prefs);
    }

    /// Replace preferences from hydrated data. Only authenticated payloads
    /// carry a container; anything else leaves the store untouched.
    pub fn apply(&self, data: &SetData) {
        if !data.authed {
            return;
        }
        if let Some(container) = &data.data.container {
            let prefs = StudyPreferences::from_container(container, self.features);
            *self.inner.write().unwrap_or_else(PoisonError::into_inner) = prefs;
        }
    }

    /// Seed from the hydrator's current data and follow every refetch
    pub fn follow<G: Gateway + ?Sized + 'static>(&self, hydrator: &SetHydrator<G>) -> Subscription {
        if let Some(data) = hydrator.data() {
            self.apply(&data);
        }
        let store = self.clone();
        hydrator.subscribe(move |data| store.apply(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sets::{EntityKind, StudySet, StudySetWithContainer};

    fn authed_data(shuffle: bool, feedback: bool) -> SetData {
        let mut container = Container::new("user", "set", EntityKind::StudySet);
        container.shuffle_flashcards = shuffle;
        container.extended_feedback_bank = feedback;
        container.starred_terms = vec!["a".into()];
        SetData::from_fetch(StudySetWithContainer {
            set: StudySet::new("set", "owner", "Title"),
            container: Some(container),
        })
    }

    #[test]
    fn test_apply_authed_container() {
        let store = PreferenceStore::new(EnabledFeatures::empty());
        store.apply(&authed_data(true, true));

        let prefs = store.get();
        assert!(prefs.shuffle_flashcards);
        assert_eq!(prefs.starred_terms, vec!["a"]);
        // Feature flag missing
        assert!(!prefs.extended_feedback_bank);
    }

    #[test]
    fn test_feedback_bank_needs_flag() {
        let store = PreferenceStore::new(EnabledFeatures::EXTENDED_FEEDBACK_BANK);
        store.apply(&authed_data(false, true));
        assert!(store.get().extended_feedback_bank);
    }

    #[test]
    fn test_public_data_leaves_store_alone() {
        let store = PreferenceStore::new(EnabledFeatures::empty());
        store.update(|p| p.shuffle_learn = true);
        store.apply(&SetData::from_fetch(StudySetWithContainer {
            set: StudySet::new("set", "owner", "Title"),
            container: None,
        }));
        assert!(store.get().shuffle_learn);
    }
}
