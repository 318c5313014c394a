//! Study session stores
//!
//! One store per study mode, scoped to one active run through a set. Every
//! store is built on `SessionCore`, which owns the phase machine and the
//! term order:
//!
//! ```text
//! Initializing --initialize--> Active --submit/complete--> Submitting
//! Submitting --saves settled--> Terminal
//! Submitting --save failed / settle timed out--> Active
//! ```
//!
//! Progress is recorded locally first; the remote write runs in the
//! background through a `Persister`. Finishing a round waits until those
//! writes settle so completion never races an in-flight save.
//! Writes that failed are re-sent on the next submit, and the store only
//! reaches Terminal once every one of them went through.

pub mod editor;
pub mod flashcards;
pub mod learn;
pub mod matching;
pub mod order;
pub mod saves;
pub mod test_mode;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::gateway::{Gateway, PutStudiableTerm};
use crate::sets::{AnswerMode, Term};

pub use editor::EditorSession;
pub use flashcards::{FlashcardsSession, FlashcardsSummary};
pub use learn::{LearnSession, LearnSummary};
pub use matching::{MatchSession, MatchSummary, PickOutcome};
pub use order::TermOrder;
pub use saves::{Persister, SaveTracker};
pub use test_mode::{TestResult, TestSession};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session is not initialized")]
    NotReady,

    #[error("Round is finished; start a new round first")]
    RoundFinished,

    #[error("Unknown term: {0}")]
    UnknownTerm(String),

    #[error("Card sorting is not enabled")]
    SortingDisabled,

    #[error("Saving progress failed: {0}")]
    Persist(String),

    #[error("Saves did not settle within {0:?}")]
    SaveTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Active,
    Submitting,
    Terminal,
}

/// State shared by every mode store
#[derive(Debug, Clone)]
pub struct SessionCore {
    phase: SessionPhase,
    order: TermOrder,
    round: i32,
    progress: usize,
    round_started: Option<DateTime<Utc>>,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCore {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Initializing,
            order: TermOrder::default(),
            round: 0,
            progress: 0,
            round_started: None,
        }
    }

    /// Snapshot the base order and start round 0
    pub fn initialize(&mut self, base: Vec<String>, shuffle: bool) {
        self.order = TermOrder::new(base, shuffle);
        self.round = 0;
        self.start_round();
        log::debug!("session: initialized with {} terms", self.order.len());
    }

    /// Reopen for another round over the same base order
    pub fn restart(&mut self, base: Vec<String>, shuffle: bool) {
        self.order = TermOrder::new(base, shuffle);
        self.round += 1;
        self.start_round();
        log::debug!("session: round {} started", self.round);
    }

    /// Next round within the same run, keeping the working order
    pub fn advance_round(&mut self) {
        self.round += 1;
        self.progress = 0;
        self.round_started = Some(Utc::now());
    }

    fn start_round(&mut self) {
        self.progress = 0;
        self.round_started = Some(Utc::now());
        self.phase = SessionPhase::Active;
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.order.is_shuffled() != enabled {
            self.order.set_shuffle(enabled);
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn order(&self) -> &TermOrder {
        &self.order
    }

    pub fn round(&self) -> i32 {
        self.round
    }

    /// Continue numbering from a previous visit
    pub fn resume_round(&mut self, round: i32) {
        self.round = round;
    }

    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn set_progress(&mut self, progress: usize) {
        self.progress = progress;
    }

    pub fn round_started(&self) -> Option<DateTime<Utc>> {
        self.round_started
    }

    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Terminal
    }

    /// Fails unless answers may be recorded
    pub fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Initializing => Err(SessionError::NotReady),
            SessionPhase::Active => Ok(()),
            SessionPhase::Submitting | SessionPhase::Terminal => Err(SessionError::RoundFinished),
        }
    }

    pub fn begin_submit(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.phase = SessionPhase::Submitting;
        log::debug!("session: submitting round {}", self.round);
        Ok(())
    }

    /// Re-send writes that failed earlier, wait for every outstanding save,
    /// then move to Terminal. Stays Active while any write is still failed
    /// or the wait timed out.
    pub async fn finish_submit(&mut self, persister: &Persister, timeout: Duration) -> Result<(), SessionError> {
        let retried = persister.retry_failed();
        if retried > 0 {
            log::info!("session: re-sent {} failed save(s) in round {}", retried, self.round);
        }

        if let Err(err) = persister.tracker().settled(timeout).await {
            log::warn!("session: {}", err);
            self.phase = SessionPhase::Active;
            return Err(err);
        }

        if let Some(first) = persister.first_failure() {
            log::warn!(
                "session: {} save(s) failed in round {}, staying active",
                persister.failed_count(),
                self.round
            );
            self.phase = SessionPhase::Active;
            return Err(SessionError::Persist(first.to_string()));
        }

        self.finish();
        Ok(())
    }

    /// Submitting to Terminal for stores that keep their results local
    pub fn finish(&mut self) {
        self.phase = SessionPhase::Terminal;
        log::info!("session: round {} complete", self.round);
    }
}

/// Send one progress record in the background
pub(crate) fn persist_progress<G>(gateway: &Arc<G>, persister: &Persister, input: PutStudiableTerm)
where
    G: Gateway + ?Sized + 'static,
{
    let gateway = Arc::clone(gateway);
    let key = format!("progress for term {}", input.id);
    persister.spawn(key, move || {
        let gateway = Arc::clone(&gateway);
        let input = input.clone();
        async move { gateway.put_studiable_term(input).await }
    });
}

/// The side shown as the prompt and the side expected as the answer
pub(crate) fn sides(term: &Term, answer_with: AnswerMode) -> (&str, &str) {
    match answer_with {
        AnswerMode::Word => (term.definition.as_str(), term.word.as_str()),
        AnswerMode::Definition | AnswerMode::Both => (term.word.as_str(), term.definition.as_str()),
    }
}

/// Typed answers ignore case and surrounding whitespace
pub(crate) fn answers_match(given: &str, expected: &str) -> bool {
    given.trim().to_lowercase() == expected.trim().to_lowercase()
}
