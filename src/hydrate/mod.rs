//! Session hydration
//!
//! Fetches the active study set through the gateway (authenticated or
//! public path depending on sign-in status), splits the viewer's progress
//! records by study mode, and notifies registered listeners on every fresh
//! fetch.
//!
//! Fetches are suppressed while unsaved local edits exist (the dirty flag).
//! Clearing the flag forces exactly one refetch. A response that arrives
//! after the flag was raised, after the sign-in status changed, or after
//! teardown is discarded.

pub mod listeners;
pub mod preferences;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::gateway::{Gateway, GatewayError};
use crate::sets::{StudiableTerm, StudyMode, StudySetWithContainer};

pub use listeners::{Listeners, Subscription};
pub use preferences::{PreferenceStore, StudyPreferences};

/// Sign-in status of the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Session not resolved yet; no fetch is issued
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Rendering options of a hydrated view
#[derive(Debug, Clone, Copy, Default)]
pub struct HydrateOptions {
    /// Report Loading while local edits are unsaved
    pub disallow_dirty: bool,
    /// Report Loading until a fetch completed after construction
    pub require_fresh: bool,
    /// Report Empty instead of Loading when no data exists
    pub allow_empty: bool,
}

/// Progress records split by study mode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectedTerms {
    pub studiable_learn_terms: Vec<StudiableTerm>,
    pub studiable_flashcard_terms: Vec<StudiableTerm>,
}

/// A fetched study set plus derived fields
#[derive(Debug, Clone)]
pub struct SetData {
    pub data: StudySetWithContainer,
    /// True when the payload carried the viewer's container
    pub authed: bool,
    pub injected: Option<InjectedTerms>,
}

impl SetData {
    /// Derive the per-mode split; recomputed for every fetch
    pub fn from_fetch(data: StudySetWithContainer) -> Self {
        let Some(container) = &data.container else {
            return Self {
                data,
                authed: false,
                injected: None,
            };
        };

        let by_mode = |mode: StudyMode| -> Vec<StudiableTerm> {
            container
                .studiable_terms
                .iter()
                .filter(|t| t.mode == mode)
                .cloned()
                .collect()
        };
        let injected = InjectedTerms {
            studiable_learn_terms: by_mode(StudyMode::Learn),
            studiable_flashcard_terms: by_mode(StudyMode::Flashcards),
        };

        Self {
            data,
            authed: true,
            injected: Some(injected),
        }
    }

    /// Container id progress is recorded through, if signed in
    pub fn experience_id(&self) -> Option<&str> {
        self.data.container.as_ref().map(|c| c.id.as_str())
    }
}

/// What a view over the hydrator should show
#[derive(Debug, Clone)]
pub enum HydrationState {
    Loading,
    NotFound,
    Forbidden,
    /// Any other fetch failure while no data is available; `retry()` issues
    /// one new fetch
    Failed { message: String, status: u16 },
    Empty,
    Ready(Arc<SetData>),
}

/// Why a fetch was not issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    MissingId,
    AuthPending,
    Dirty,
    TornDown,
}

/// Result of one hydrate call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched,
    Suppressed(SuppressReason),
    /// Response arrived for a superseded request and was ignored
    Discarded,
    Failed(GatewayError),
    /// Nothing to do (dirty flag was already clear)
    Unchanged,
}

struct HydratorState {
    auth: AuthStatus,
    dirty: bool,
    data: Option<Arc<SetData>>,
    error: Option<GatewayError>,
    fetched_after_mount: bool,
    generation: u64,
    fetches_issued: u64,
    torn_down: bool,
}

/// Hydration layer for one study set
pub struct SetHydrator<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    set_id: String,
    options: HydrateOptions,
    state: Mutex<HydratorState>,
    listeners: Listeners,
}

impl<G: Gateway + ?Sized> SetHydrator<G> {
    pub fn new(gateway: Arc<G>, set_id: &str, auth: AuthStatus, options: HydrateOptions) -> Self {
        Self {
            gateway,
            set_id: set_id.to_string(),
            options,
            state: Mutex::new(HydratorState {
                auth,
                dirty: false,
                data: None,
                error: None,
                fetched_after_mount: false,
                generation: 0,
                fetches_issued: 0,
                torn_down: false,
            }),
            listeners: Listeners::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HydratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Update sign-in status. A change switches between the authenticated
    /// and public query, so responses still in flight are discarded.
    pub fn set_auth_status(&self, auth: AuthStatus) {
        let mut state = self.lock();
        if state.auth != auth {
            log::debug!("hydrate: auth status {:?} -> {:?}", state.auth, auth);
            state.auth = auth;
            state.generation += 1;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Unsaved local edits exist; suppress fetches until cleared
    pub fn mark_dirty(&self) {
        let mut state = self.lock();
        if !state.dirty {
            log::debug!("hydrate: set {} marked dirty", self.set_id);
            state.dirty = true;
            state.generation += 1;
        }
    }

    /// Local edits are saved; forces one refetch
    pub async fn clear_dirty(&self) -> FetchOutcome {
        {
            let mut state = self.lock();
            if !state.dirty {
                return FetchOutcome::Unchanged;
            }
            state.dirty = false;
        }
        log::debug!("hydrate: set {} clean, refetching", self.set_id);
        self.hydrate().await
    }

    /// Fetch the set unless a fetch is currently suppressed
    pub async fn hydrate(&self) -> FetchOutcome {
        let (generation, authed) = {
            let mut state = self.lock();
            let suppressed = if state.torn_down {
                Some(SuppressReason::TornDown)
            } else if self.set_id.is_empty() {
                Some(SuppressReason::MissingId)
            } else if state.auth == AuthStatus::Loading {
                Some(SuppressReason::AuthPending)
            } else if state.dirty {
                Some(SuppressReason::Dirty)
            } else {
                None
            };
            if let Some(reason) = suppressed {
                log::debug!("hydrate: fetch of {} suppressed ({:?})", self.set_id, reason);
                return FetchOutcome::Suppressed(reason);
            }

            state.fetches_issued += 1;
            (state.generation, state.auth == AuthStatus::Authenticated)
        };

        log::info!(
            "hydrate: fetching set {} ({})",
            self.set_id,
            if authed { "byId" } else { "getPublic" }
        );
        let result = self.gateway.fetch_study_set(&self.set_id, authed).await;

        let fresh = {
            let mut state = self.lock();
            if state.torn_down || state.generation != generation {
                log::debug!("hydrate: discarding stale response for {}", self.set_id);
                return FetchOutcome::Discarded;
            }

            match result {
                Ok(data) => {
                    let data = Arc::new(SetData::from_fetch(data));
                    state.data = Some(Arc::clone(&data));
                    state.error = None;
                    state.fetched_after_mount = true;
                    data
                }
                Err(err) => {
                    match &err {
                        GatewayError::NotFound(_) | GatewayError::Forbidden(_) => {
                            log::info!("hydrate: set {} unavailable: {}", self.set_id, err)
                        }
                        _ => log::error!("hydrate: fetching set {} failed: {}", self.set_id, err),
                    }
                    state.error = Some(err.clone());
                    return FetchOutcome::Failed(err);
                }
            }
        };

        self.listeners.emit(&fresh);
        FetchOutcome::Fetched
    }

    /// Re-issue a fetch after a failure
    pub async fn retry(&self) -> FetchOutcome {
        log::info!("hydrate: retrying set {}", self.set_id);
        self.hydrate().await
    }

    pub fn data(&self) -> Option<Arc<SetData>> {
        self.lock().data.clone()
    }

    /// Number of fetches issued so far
    pub fn fetches_issued(&self) -> u64 {
        self.lock().fetches_issued
    }

    /// Current view state
    pub fn state(&self) -> HydrationState {
        let state = self.lock();

        match &state.error {
            Some(GatewayError::NotFound(_)) => return HydrationState::NotFound,
            Some(GatewayError::Forbidden(_)) => return HydrationState::Forbidden,
            Some(err) if state.data.is_none() => {
                return HydrationState::Failed {
                    message: err.to_string(),
                    status: err.http_status(),
                }
            }
            _ => {}
        }

        if (!self.options.allow_empty && state.data.is_none())
            || (self.options.disallow_dirty && state.dirty)
            || (self.options.require_fresh && !state.fetched_after_mount)
        {
            return HydrationState::Loading;
        }

        match &state.data {
            Some(data) => HydrationState::Ready(Arc::clone(data)),
            None => HydrationState::Empty,
        }
    }

    /// Register for "set data refetched" notifications
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SetData) + Send + Sync + 'static,
    {
        self.listeners.register(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop processing responses and drop all listeners
    pub fn teardown(&self) {
        let mut state = self.lock();
        state.torn_down = true;
        state.generation += 1;
        drop(state);
        self.listeners.clear();
        log::debug!("hydrate: set {} torn down", self.set_id);
    }
}
