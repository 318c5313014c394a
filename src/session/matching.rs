//! Match session
//!
//! Up to `PAIRS_PER_ROUND` terms are split into word and definition tiles
//! and shuffled. The player pairs them up against a clock; every wrong pair
//! adds `MISMATCH_PENALTY` to the elapsed time. The clock is published on a
//! watch channel every tick and stops when the round completes. Match
//! results are not saved remotely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::order::starred_only;
use super::{SessionCore, SessionError, SessionPhase};
use crate::hydrate::{SetData, StudyPreferences};
use crate::sets::Term;

pub const PAIRS_PER_ROUND: usize = 6;
pub const MISMATCH_PENALTY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TileSide {
    Word,
    Definition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub term_id: String,
    pub side: TileSide,
    pub text: String,
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOutcome {
    Matched,
    Mismatch,
    /// Last pair matched; the clock is stopped
    RoundComplete,
    /// Same tile twice, same side twice, or an already matched tile
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub round: i32,
    pub pairs: usize,
    pub mistakes: usize,
    pub elapsed_ms: u64,
}

/// Ticker state shared with the clock task
struct Clock {
    started: Instant,
    penalty_ms: Arc<AtomicU64>,
    stopped_at: Arc<Mutex<Option<Duration>>>,
    publish: Arc<watch::Sender<Duration>>,
    cancel: CancellationToken,
}

impl Clock {
    fn start(tick: Duration, publish: Arc<watch::Sender<Duration>>) -> Self {
        let clock = Self {
            started: Instant::now(),
            penalty_ms: Arc::new(AtomicU64::new(0)),
            stopped_at: Arc::new(Mutex::new(None)),
            publish,
            cancel: CancellationToken::new(),
        };
        clock.publish.send_replace(Duration::ZERO);

        let started = clock.started;
        let penalty_ms = Arc::clone(&clock.penalty_ms);
        let stopped_at = Arc::clone(&clock.stopped_at);
        let publish = Arc::clone(&clock.publish);
        let cancel = clock.cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        // Held while publishing so a stop cannot be overwritten
                        let stopped = stopped_at.lock().unwrap_or_else(PoisonError::into_inner);
                        if stopped.is_some() {
                            break;
                        }
                        let penalty = Duration::from_millis(penalty_ms.load(Ordering::SeqCst));
                        publish.send_replace(started.elapsed() + penalty);
                    }
                }
            }
        });
        clock
    }

    fn elapsed(&self) -> Duration {
        let stopped = self.stopped_at.lock().unwrap_or_else(PoisonError::into_inner);
        match *stopped {
            Some(at) => at,
            None => self.started.elapsed() + Duration::from_millis(self.penalty_ms.load(Ordering::SeqCst)),
        }
    }

    fn add_penalty(&self, penalty: Duration) {
        self.penalty_ms.fetch_add(penalty.as_millis() as u64, Ordering::SeqCst);
    }

    fn stop(&self) -> Duration {
        let mut stopped = self.stopped_at.lock().unwrap_or_else(PoisonError::into_inner);
        let at = match *stopped {
            Some(at) => at,
            None => self.started.elapsed() + Duration::from_millis(self.penalty_ms.load(Ordering::SeqCst)),
        };
        *stopped = Some(at);
        self.publish.send_replace(at);
        self.cancel.cancel();
        at
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct MatchSession {
    core: SessionCore,
    tick: Duration,
    terms: Vec<Term>,
    tiles: Vec<Tile>,
    mistakes: usize,
    publish: Arc<watch::Sender<Duration>>,
    clock: Option<Clock>,
}

impl MatchSession {
    pub fn new(tick: Duration) -> Self {
        let (publish, _) = watch::channel(Duration::ZERO);
        Self {
            core: SessionCore::new(),
            // interval() panics on a zero period
            tick: tick.max(Duration::from_millis(1)),
            terms: Vec::new(),
            tiles: Vec::new(),
            mistakes: 0,
            publish: Arc::new(publish),
            clock: None,
        }
    }

    /// Deal the first round and start the clock. Must run inside a tokio
    /// runtime.
    pub fn initialize(&mut self, data: &SetData, prefs: &StudyPreferences) {
        let set = &data.data.set;
        self.terms = set.terms.clone();

        let mut base = set.term_order();
        if prefs.match_study_starred {
            base = starred_only(&base, &prefs.starred_terms);
        }
        self.core.initialize(base, true);
        self.deal();
        log::info!("session: match for {} ({} pairs)", set.id, self.pairs());
    }

    fn deal(&mut self) {
        let mut tiles = Vec::new();
        for id in self.core.order().working().iter().take(PAIRS_PER_ROUND) {
            let Some(term) = self.terms.iter().find(|t| &t.id == id) else {
                continue;
            };
            tiles.push(Tile {
                term_id: term.id.clone(),
                side: TileSide::Word,
                text: term.word.clone(),
                matched: false,
            });
            tiles.push(Tile {
                term_id: term.id.clone(),
                side: TileSide::Definition,
                text: term.definition.clone(),
                matched: false,
            });
        }
        tiles.shuffle(&mut rand::thread_rng());

        self.tiles = tiles;
        self.mistakes = 0;
        if let Some(previous) = self.clock.take() {
            previous.stop();
        }
        self.clock = Some(Clock::start(self.tick, Arc::clone(&self.publish)));
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.phase()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn pairs(&self) -> usize {
        self.tiles.len() / 2
    }

    /// Pairs matched so far
    pub fn progress(&self) -> usize {
        self.core.progress()
    }

    pub fn mistakes(&self) -> usize {
        self.mistakes
    }

    /// Elapsed time including penalties, published every tick
    pub fn clock(&self) -> watch::Receiver<Duration> {
        self.publish.subscribe()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.as_ref().map(Clock::elapsed).unwrap_or_default()
    }

    /// Try to pair two tiles by index
    pub fn pick(&mut self, first: usize, second: usize) -> Result<PickOutcome, SessionError> {
        self.core.ensure_active()?;
        let (Some(a), Some(b)) = (self.tiles.get(first), self.tiles.get(second)) else {
            return Ok(PickOutcome::Ignored);
        };
        if first == second || a.side == b.side || a.matched || b.matched {
            return Ok(PickOutcome::Ignored);
        }

        if a.term_id != b.term_id {
            self.mistakes += 1;
            if let Some(clock) = &self.clock {
                clock.add_penalty(MISMATCH_PENALTY);
            }
            return Ok(PickOutcome::Mismatch);
        }

        self.tiles[first].matched = true;
        self.tiles[second].matched = true;
        self.core.set_progress(self.core.progress() + 1);

        if self.core.progress() < self.pairs() {
            return Ok(PickOutcome::Matched);
        }
        if let Some(clock) = &self.clock {
            clock.stop();
        }
        self.core.begin_submit()?;
        Ok(PickOutcome::RoundComplete)
    }

    /// Finish the round, stopping the clock if it is still running
    pub async fn complete(&mut self) -> Result<MatchSummary, SessionError> {
        match self.core.phase() {
            SessionPhase::Initializing => return Err(SessionError::NotReady),
            SessionPhase::Terminal => return Err(SessionError::RoundFinished),
            SessionPhase::Active => {
                if let Some(clock) = &self.clock {
                    clock.stop();
                }
                self.core.begin_submit()?;
            }
            SessionPhase::Submitting => {}
        }
        self.core.finish();

        Ok(MatchSummary {
            round: self.core.round(),
            pairs: self.pairs(),
            mistakes: self.mistakes,
            elapsed_ms: self.elapsed().as_millis() as u64,
        })
    }

    /// Deal a new round from a fresh shuffle
    pub fn new_round(&mut self) -> Result<(), SessionError> {
        if self.core.phase() == SessionPhase::Initializing {
            return Err(SessionError::NotReady);
        }
        let base = self.core.order().base().to_vec();
        self.core.restart(base, true);
        self.deal();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::tests::fixture;
    use crate::gateway::MemoryGateway;
    use crate::session::tests::hydrated;
    use crate::sets::{StudySet, StudySetWithContainer};

    const TICK: Duration = Duration::from_millis(10);

    async fn session() -> MatchSession {
        let gateway = Arc::new(MemoryGateway::new(fixture(), None));
        let data = hydrated(&gateway, false).await;
        let mut session = MatchSession::new(TICK);
        session.initialize(&data, &StudyPreferences::default());
        session
    }

    /// Index of the tile on the other side of `index`'s term
    fn partner(session: &MatchSession, index: usize) -> usize {
        let tile = &session.tiles()[index];
        session
            .tiles()
            .iter()
            .position(|t| t.term_id == tile.term_id && t.side != tile.side)
            .unwrap()
    }

    fn first_unmatched(session: &MatchSession) -> Option<usize> {
        session.tiles().iter().position(|t| !t.matched)
    }

    #[tokio::test]
    async fn test_small_set_deals_all_pairs() {
        let session = session().await;
        assert_eq!(session.pairs(), 3);
        assert_eq!(session.tiles().len(), 6);
    }

    #[tokio::test]
    async fn test_round_capped_at_six_pairs() {
        let mut set = StudySet::new("big", "alice", "Numbers");
        for rank in 0..9 {
            let mut term = Term::new("big", &format!("w{}", rank), &format!("d{}", rank), rank);
            term.id = format!("t{}", rank);
            set.terms.push(term);
        }
        let data = SetData::from_fetch(StudySetWithContainer { set, container: None });
        let mut session = MatchSession::new(TICK);
        session.initialize(&data, &StudyPreferences::default());
        assert_eq!(session.pairs(), PAIRS_PER_ROUND);
    }

    #[tokio::test]
    async fn test_mismatch_adds_penalty() {
        let mut session = session().await;
        let first = 0;
        let wrong = session
            .tiles()
            .iter()
            .position(|t| t.term_id != session.tiles()[first].term_id && t.side != session.tiles()[first].side)
            .unwrap();

        assert_eq!(session.pick(first, wrong), Ok(PickOutcome::Mismatch));
        assert_eq!(session.mistakes(), 1);
        assert!(session.elapsed() >= MISMATCH_PENALTY);
        assert_eq!(session.pick(first, first), Ok(PickOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_clock_ticks_then_stops_on_completion() {
        let mut session = session().await;
        let mut clock = session.clock();
        tokio::time::timeout(Duration::from_secs(2), clock.changed())
            .await
            .unwrap()
            .unwrap();

        let mut outcome = PickOutcome::Ignored;
        while let Some(index) = first_unmatched(&session) {
            let other = partner(&session, index);
            outcome = session.pick(index, other).unwrap();
        }
        assert_eq!(outcome, PickOutcome::RoundComplete);
        assert_eq!(session.progress(), 3);

        let stopped = *session.clock().borrow();
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(*session.clock().borrow(), stopped);

        let summary = session.complete().await.unwrap();
        assert_eq!(summary.pairs, 3);
        assert_eq!(summary.elapsed_ms, stopped.as_millis() as u64);
        assert_eq!(session.phase(), SessionPhase::Terminal);
        assert_eq!(session.pick(0, 1), Err(SessionError::RoundFinished));
    }

    #[tokio::test]
    async fn test_complete_early_and_new_round() {
        let mut session = session().await;
        let summary = session.complete().await.unwrap();
        assert_eq!(summary.mistakes, 0);

        session.new_round().unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.progress(), 0);
        assert!(session.tiles().iter().all(|t| !t.matched));
    }
}
