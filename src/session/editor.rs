//! Set editor session
//!
//! Term edits apply to a local copy right away, mark the hydrator dirty so
//! no refetch clobbers them, and are saved in the background. `complete`
//! is the "Done" action: it waits for every outstanding save, then clears
//! the dirty flag, which refetches the set once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::saves::{Persister, SaveTracker};
use super::{SessionCore, SessionError, SessionPhase};
use crate::gateway::{EditTerm, Gateway};
use crate::hydrate::{FetchOutcome, SetHydrator};
use crate::sets::StudySet;

pub struct EditorSession<G: Gateway + ?Sized> {
    hydrator: Arc<SetHydrator<G>>,
    core: SessionCore,
    persister: Persister,
    settle_timeout: Duration,
    set: StudySet,
}

impl<G: Gateway + ?Sized + 'static> EditorSession<G> {
    /// Open the editor over already hydrated data
    pub fn new(hydrator: Arc<SetHydrator<G>>, settle_timeout: Duration) -> Result<Self, SessionError> {
        let data = hydrator.data().ok_or(SessionError::NotReady)?;
        let set = data.data.set.clone();

        let mut core = SessionCore::new();
        core.initialize(set.term_order(), false);

        Ok(Self {
            hydrator,
            core,
            persister: Persister::new(SaveTracker::new()),
            settle_timeout,
            set,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.phase()
    }

    /// Local copy including unsaved edits
    pub fn set(&self) -> &StudySet {
        &self.set
    }

    pub fn edit_term(&mut self, term_id: &str, word: &str, definition: &str) -> Result<(), SessionError> {
        self.core.ensure_active()?;
        let term = self
            .set
            .terms
            .iter_mut()
            .find(|t| t.id == term_id)
            .ok_or_else(|| SessionError::UnknownTerm(term_id.to_string()))?;

        term.word = word.to_string();
        term.definition = definition.to_string();
        let input = EditTerm::from(&*term);

        self.hydrator.mark_dirty();
        let gateway = Arc::clone(self.hydrator.gateway());
        self.persister.spawn(format!("term {}", term_id), move || {
            let gateway = Arc::clone(&gateway);
            let input = input.clone();
            async move { gateway.edit_term(input).await }
        });
        Ok(())
    }

    pub fn is_saving(&self) -> bool {
        self.persister.tracker().is_saving()
    }

    pub fn save_error(&self) -> Option<String> {
        self.persister.tracker().save_error()
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.persister.tracker().saved_at()
    }

    /// Re-send failed edits and wait for saves to settle, then release the
    /// dirty flag. A failed or timed out save keeps the editor open and the
    /// set dirty.
    pub async fn complete(&mut self) -> Result<FetchOutcome, SessionError> {
        self.core.begin_submit()?;
        self.core
            .finish_submit(&self.persister, self.settle_timeout)
            .await?;
        Ok(self.hydrator.clear_dirty().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::tests::fixture;
    use crate::gateway::MemoryGateway;
    use crate::hydrate::tests::GatedGateway;
    use crate::hydrate::{AuthStatus, HydrateOptions, SuppressReason};
    use std::sync::atomic::Ordering;

    const SETTLE: Duration = Duration::from_secs(5);

    async fn editor(viewer: &str, delay: Duration) -> (Arc<GatedGateway>, Arc<SetHydrator<GatedGateway>>) {
        let gateway = Arc::new(GatedGateway::new(MemoryGateway::new(fixture(), Some(viewer))).slow_puts(delay));
        let hydrator = Arc::new(SetHydrator::new(
            Arc::clone(&gateway),
            "public",
            AuthStatus::Authenticated,
            HydrateOptions::default(),
        ));
        hydrator.hydrate().await;
        (gateway, hydrator)
    }

    #[tokio::test]
    async fn test_needs_hydrated_data() {
        let gateway = Arc::new(MemoryGateway::new(fixture(), Some("alice")));
        let hydrator = Arc::new(SetHydrator::new(gateway, "public", AuthStatus::Loading, HydrateOptions::default()));
        assert!(matches!(EditorSession::new(hydrator, SETTLE), Err(SessionError::NotReady)));
    }

    #[tokio::test]
    async fn test_done_waits_for_save_then_refetches_once() {
        let (gateway, hydrator) = editor("alice", Duration::from_millis(100)).await;
        let mut session = EditorSession::new(Arc::clone(&hydrator), SETTLE).unwrap();

        session.edit_term("a", "France", "Paris, Île-de-France").unwrap();
        assert!(session.is_saving());
        assert!(hydrator.is_dirty());
        assert_eq!(
            hydrator.hydrate().await,
            FetchOutcome::Suppressed(SuppressReason::Dirty)
        );
        let fetches = gateway.fetches.load(Ordering::SeqCst);

        assert_eq!(session.complete().await, Ok(FetchOutcome::Fetched));
        assert!(!session.is_saving());
        assert!(session.saved_at().is_some());
        assert!(!hydrator.is_dirty());
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), fetches + 1);

        let data = hydrator.data().unwrap();
        assert_eq!(data.data.set.term("a").unwrap().definition, "Paris, Île-de-France");
        assert_eq!(session.phase(), SessionPhase::Terminal);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_set_dirty() {
        // Only the owner may edit terms
        let (_gateway, hydrator) = editor("bob", Duration::ZERO).await;
        let mut session = EditorSession::new(Arc::clone(&hydrator), SETTLE).unwrap();
        session.edit_term("b", "Spain", "Madrid!").unwrap();

        let err = session.complete().await.unwrap_err();
        assert!(matches!(err, SessionError::Persist(_)));
        assert!(session.save_error().is_some());
        assert!(hydrator.is_dirty());
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.set().term("b").unwrap().definition, "Madrid!");
    }

    #[tokio::test]
    async fn test_done_resends_failed_edit_once_gateway_recovers() {
        let (gateway, hydrator) = editor("alice", Duration::ZERO).await;
        gateway.fail_puts.store(true, Ordering::SeqCst);
        let mut session = EditorSession::new(Arc::clone(&hydrator), SETTLE).unwrap();
        session.edit_term("a", "France", "EDITED").unwrap();

        assert!(matches!(session.complete().await, Err(SessionError::Persist(_))));
        assert!(hydrator.is_dirty());

        gateway.fail_puts.store(false, Ordering::SeqCst);
        assert_eq!(session.complete().await, Ok(FetchOutcome::Fetched));
        assert_eq!(session.phase(), SessionPhase::Terminal);
        assert!(session.save_error().is_none());

        let server = gateway.inner.snapshot();
        let stored = server.study_sets.iter().find(|s| s.id == "public").unwrap();
        assert_eq!(stored.term("a").unwrap().definition, "EDITED");
        let data = hydrator.data().unwrap();
        assert_eq!(data.data.set.term("a").unwrap().definition, "EDITED");
    }

    #[tokio::test]
    async fn test_unknown_term() {
        let (_gateway, hydrator) = editor("alice", Duration::ZERO).await;
        let mut session = EditorSession::new(hydrator, SETTLE).unwrap();
        assert_eq!(
            session.edit_term("zzz", "w", "d"),
            Err(SessionError::UnknownTerm("zzz".into()))
        );
    }
}
