//! Learn session
//!
//! Terms are studied in rounds of `ROUND_SIZE`. A correct answer moves a
//! term from unstudied (0) to familiar (1) to mastered (2); an incorrect
//! answer sets it to -1. Mastered terms leave the rotation. Every answer is
//! recorded locally first and then saved in Learn mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::order::starred_only;
use super::saves::{Persister, SaveTracker};
use super::{answers_match, persist_progress, sides, SessionCore, SessionError, SessionPhase};
use crate::gateway::{Gateway, PutStudiableTerm};
use crate::hydrate::{SetData, StudyPreferences};
use crate::sets::{AnswerMode, StudyMode, Term};

pub const ROUND_SIZE: usize = 7;
pub const MASTERED: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnSummary {
    pub total: usize,
    pub mastered: usize,
    pub rounds: i32,
    /// (term id, correctness) in working order
    pub terms: Vec<(String, i32)>,
}

pub struct LearnSession<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    core: SessionCore,
    persister: Persister,
    settle_timeout: Duration,
    experience_id: Option<String>,
    terms: HashMap<String, Term>,
    correctness: HashMap<String, i32>,
    round_terms: Vec<String>,
    answer_with: AnswerMode,
}

impl<G: Gateway + ?Sized + 'static> LearnSession<G> {
    pub fn new(gateway: Arc<G>, settle_timeout: Duration) -> Self {
        Self {
            gateway,
            core: SessionCore::new(),
            persister: Persister::new(SaveTracker::new()),
            settle_timeout,
            experience_id: None,
            terms: HashMap::new(),
            correctness: HashMap::new(),
            round_terms: Vec::new(),
            answer_with: AnswerMode::default(),
        }
    }

    /// Start from hydrated data, resuming earlier Learn progress
    pub fn initialize(&mut self, data: &SetData, prefs: &StudyPreferences) {
        let set = &data.data.set;
        self.terms = set.terms.iter().map(|t| (t.id.clone(), t.clone())).collect();
        self.experience_id = data.experience_id().map(str::to_string);
        self.answer_with = prefs.answer_with;

        let mut base = set.term_order();
        if prefs.study_starred {
            base = starred_only(&base, &prefs.starred_terms);
        }
        self.correctness = base.iter().map(|id| (id.clone(), 0)).collect();
        self.core.initialize(base, prefs.shuffle_learn);

        if let Some(injected) = &data.injected {
            let mut last_round = None;
            for record in &injected.studiable_learn_terms {
                if let Some(value) = self.correctness.get_mut(&record.term_id) {
                    *value = record.correctness;
                    last_round = last_round.max(record.appeared_in_round);
                }
            }
            if let Some(round) = last_round {
                self.core.resume_round(round + 1);
            }
        }

        self.fill_round();
        log::info!(
            "session: learn for {} ({} terms, {} mastered)",
            set.id,
            self.core.order().len(),
            self.mastered_count()
        );
    }

    pub fn apply_preferences(&mut self, prefs: &StudyPreferences) {
        self.core.set_shuffle(prefs.shuffle_learn);
        self.answer_with = prefs.answer_with;
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.core.set_shuffle(enabled);
    }

    fn fill_round(&mut self) {
        self.round_terms = self
            .core
            .order()
            .working()
            .iter()
            .filter(|id| self.correctness.get(*id).copied().unwrap_or(0) < MASTERED)
            .take(ROUND_SIZE)
            .cloned()
            .collect();
        self.core.set_progress(0);
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.phase()
    }

    pub fn round(&self) -> i32 {
        self.core.round()
    }

    pub fn round_terms(&self) -> &[String] {
        &self.round_terms
    }

    pub fn current(&self) -> Option<&Term> {
        self.round_terms
            .get(self.core.progress())
            .and_then(|id| self.terms.get(id))
    }

    /// Prompt side of the current question
    pub fn prompt(&self) -> Option<&str> {
        self.current().map(|term| sides(term, self.answer_with).0)
    }

    pub fn correctness(&self, term_id: &str) -> Option<i32> {
        self.correctness.get(term_id).copied()
    }

    pub fn is_round_done(&self) -> bool {
        self.core.progress() >= self.round_terms.len()
    }

    /// Every term is mastered
    pub fn is_finished(&self) -> bool {
        self.correctness.values().all(|c| *c >= MASTERED)
    }

    fn mastered_count(&self) -> usize {
        self.correctness.values().filter(|c| **c >= MASTERED).count()
    }

    /// Grade a typed answer to the current question
    pub fn answer(&mut self, given: &str) -> Result<bool, SessionError> {
        self.core.ensure_active()?;
        let term = self.current().ok_or(SessionError::RoundFinished)?;
        let correct = match self.answer_with {
            AnswerMode::Both => answers_match(given, &term.word) || answers_match(given, &term.definition),
            mode => answers_match(given, sides(term, mode).1),
        };
        let term_id = term.id.clone();

        self.record_answer(&term_id, correct)?;
        Ok(correct)
    }

    /// Record one answer locally, save it in the background, and move on
    /// when it answers the current question. Returns the new correctness.
    pub fn record_answer(&mut self, term_id: &str, correct: bool) -> Result<i32, SessionError> {
        self.core.ensure_active()?;
        let value = self
            .correctness
            .get_mut(term_id)
            .ok_or_else(|| SessionError::UnknownTerm(term_id.to_string()))?;

        *value = if correct { ((*value).max(0) + 1).min(MASTERED) } else { -1 };
        let correctness = *value;

        if self.round_terms.get(self.core.progress()).map(String::as_str) == Some(term_id) {
            self.core.set_progress(self.core.progress() + 1);
        }

        if let Some(experience_id) = &self.experience_id {
            persist_progress(
                &self.gateway,
                &self.persister,
                PutStudiableTerm {
                    id: term_id.to_string(),
                    experience_id: experience_id.clone(),
                    mode: StudyMode::Learn,
                    correctness,
                    appeared_in_round: Some(self.core.round()),
                },
            );
        }
        Ok(correctness)
    }

    /// Move on to the next round of unmastered terms
    pub fn next_round(&mut self) -> Result<(), SessionError> {
        self.core.ensure_active()?;
        self.core.advance_round();
        self.fill_round();
        log::debug!(
            "session: learn round {} with {} terms",
            self.core.round(),
            self.round_terms.len()
        );
        Ok(())
    }

    pub fn tracker(&self) -> &SaveTracker {
        self.persister.tracker()
    }

    /// Summary of the local state; saves are awaited first so none is in
    /// flight once this returns
    pub fn summary(&self) -> LearnSummary {
        LearnSummary {
            total: self.correctness.len(),
            mastered: self.mastered_count(),
            rounds: self.core.round() + 1,
            terms: self
                .core
                .order()
                .working()
                .iter()
                .map(|id| (id.clone(), self.correctness.get(id).copied().unwrap_or(0)))
                .collect(),
        }
    }

    pub async fn complete(&mut self) -> Result<LearnSummary, SessionError> {
        self.core.begin_submit()?;
        self.core
            .finish_submit(&self.persister, self.settle_timeout)
            .await?;
        Ok(self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::tests::fixture;
    use crate::gateway::MemoryGateway;
    use crate::hydrate::tests::GatedGateway;
    use crate::session::tests::hydrated;
    use crate::sets::{StudySet, StudySetWithContainer};
    use std::sync::atomic::Ordering;

    const SETTLE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_correctness_progression() {
        let gateway = Arc::new(MemoryGateway::new(fixture(), None));
        let data = hydrated(&gateway, false).await;
        let mut session = LearnSession::new(gateway, SETTLE);
        session.initialize(&data, &StudyPreferences::default());

        assert_eq!(session.prompt(), Some("France"));
        assert!(session.answer(" paris ").unwrap());
        assert_eq!(session.correctness("a"), Some(1));
        assert!(!session.answer("Barcelona").unwrap());
        assert_eq!(session.correctness("b"), Some(-1));
        assert_eq!(session.record_answer("a", true), Ok(2));
        assert_eq!(session.record_answer("a", true), Ok(2));

        assert_eq!(
            session.record_answer("zzz", true),
            Err(SessionError::UnknownTerm("zzz".into()))
        );
    }

    #[tokio::test]
    async fn test_mastered_terms_leave_rotation() {
        let gateway = Arc::new(MemoryGateway::new(fixture(), None));
        let data = hydrated(&gateway, false).await;
        let mut session = LearnSession::new(gateway, SETTLE);
        session.initialize(&data, &StudyPreferences::default());

        for _ in 0..2 {
            for id in ["a", "b", "c"] {
                session.record_answer(id, true).unwrap();
            }
            if !session.is_finished() {
                session.next_round().unwrap();
            }
        }
        assert!(session.is_finished());
        assert!(session.round_terms().is_empty() || session.is_round_done());
    }

    #[tokio::test]
    async fn test_round_size() {
        let mut set = StudySet::new("big", "alice", "Numbers");
        for rank in 0..10 {
            let mut term = Term::new("big", &format!("w{}", rank), &format!("d{}", rank), rank);
            term.id = format!("t{}", rank);
            set.terms.push(term);
        }
        let data = SetData::from_fetch(StudySetWithContainer { set, container: None });

        let gateway = Arc::new(MemoryGateway::new(fixture(), None));
        let mut session = LearnSession::new(gateway, SETTLE);
        session.initialize(&data, &StudyPreferences::default());
        assert_eq!(session.round_terms().len(), ROUND_SIZE);

        for _ in 0..ROUND_SIZE {
            session.answer("nope").unwrap();
        }
        assert!(session.is_round_done());
        assert_eq!(session.answer("nope"), Err(SessionError::RoundFinished));

        session.next_round().unwrap();
        assert_eq!(session.round(), 1);
        assert_eq!(session.round_terms()[0], "t0");
    }

    #[tokio::test]
    async fn test_resumes_learn_progress() {
        let gateway = Arc::new(MemoryGateway::new(fixture(), Some("bob")));
        let data = hydrated(&gateway, true).await;
        let mut first = LearnSession::new(Arc::clone(&gateway), SETTLE);
        first.initialize(&data, &StudyPreferences::default());
        first.record_answer("a", true).unwrap();
        first.record_answer("a", true).unwrap();
        first.complete().await.unwrap();

        let data = hydrated(&gateway, true).await;
        let mut second = LearnSession::new(Arc::clone(&gateway), SETTLE);
        second.initialize(&data, &StudyPreferences::default());
        assert_eq!(second.correctness("a"), Some(MASTERED));
        assert_eq!(second.round_terms(), ["b", "c"]);
        assert_eq!(second.round(), 1);
    }

    #[tokio::test]
    async fn test_complete_waits_for_slow_save() {
        let gated = GatedGateway::new(MemoryGateway::new(fixture(), Some("bob")))
            .slow_puts(Duration::from_millis(100));
        let gateway = Arc::new(gated);
        let data = hydrated(&gateway, true).await;

        let mut session = LearnSession::new(Arc::clone(&gateway), SETTLE);
        session.initialize(&data, &StudyPreferences::default());
        session.record_answer("a", true).unwrap();
        assert!(session.tracker().is_saving());

        let summary = session.complete().await.unwrap();
        assert_eq!(summary.terms[0], ("a".to_string(), 1));
        assert_eq!(session.phase(), SessionPhase::Terminal);

        // The save finished before completion
        let stored = gateway.inner.snapshot().studiable_terms;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].correctness, 1);
        assert_eq!(stored[0].mode, StudyMode::Learn);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_session_active() {
        let gated = GatedGateway::new(MemoryGateway::new(fixture(), Some("bob")));
        gated.fail_puts.store(true, Ordering::SeqCst);
        let gateway = Arc::new(gated);
        let data = hydrated(&gateway, true).await;

        let mut session = LearnSession::new(Arc::clone(&gateway), SETTLE);
        session.initialize(&data, &StudyPreferences::default());
        session.record_answer("a", false).unwrap();
        session.record_answer("b", false).unwrap();

        let err = session.complete().await.unwrap_err();
        assert!(matches!(err, SessionError::Persist(_)));
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(session.tracker().save_error().is_some());
        assert_eq!(session.correctness("b"), Some(-1));

        gateway.fail_puts.store(false, Ordering::SeqCst);
        session.record_answer("b", true).unwrap();
        assert!(session.complete().await.is_ok());

        // "a" was only answered while the gateway was down
        let stored = gateway.inner.snapshot().studiable_terms;
        let correctness = |id: &str| stored.iter().find(|t| t.term_id == id).map(|t| t.correctness);
        assert_eq!(correctness("a"), Some(-1));
        assert_eq!(correctness("b"), Some(1));
    }
}
