use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use studyset_lib::config::ClientConfig;
use studyset_lib::gateway::{Database, Gateway, HttpGateway, MemoryGateway};
use studyset_lib::hydrate::{AuthStatus, HydrateOptions, HydrationState, SetData, SetHydrator};

/// Shared application state for CLI commands
pub struct App {
    pub config: ClientConfig,
    pub gateway: Arc<dyn Gateway>,
    pub auth: AuthStatus,
    /// Fixture file and the backend serving it, written back after mutations
    fixture: Option<(PathBuf, MemoryGateway)>,
}

impl App {
    pub fn new(config_path: Option<&Path>, fixture: Option<&Path>, user: Option<&str>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => ClientConfig::default_path(),
        };
        let config = match config_path {
            Some(path) => ClientConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ClientConfig::default(),
        };

        if let Some(path) = fixture {
            let db = Database::load(path)
                .with_context(|| format!("Failed to read fixture {}", path.display()))?;
            let memory = MemoryGateway::new(db, user);
            let auth = if user.is_some() {
                AuthStatus::Authenticated
            } else {
                AuthStatus::Unauthenticated
            };
            return Ok(Self {
                config,
                gateway: Arc::new(memory.clone()),
                auth,
                fixture: Some((path.to_path_buf(), memory)),
            });
        }

        let http = HttpGateway::new(&config).context("Failed to create HTTP client")?;
        let auth = if config.session_token.is_some() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        };
        Ok(Self {
            config,
            gateway: Arc::new(http),
            auth,
            fixture: None,
        })
    }

    pub fn signed_in(&self) -> bool {
        self.auth == AuthStatus::Authenticated
    }

    /// Hydrate a set, turning the unavailable states into errors
    pub async fn load_set(&self, set_id: &str) -> Result<(SetHydrator<dyn Gateway>, Arc<SetData>)> {
        let hydrator = SetHydrator::new(Arc::clone(&self.gateway), set_id, self.auth, HydrateOptions::default());
        hydrator.hydrate().await;

        match hydrator.state() {
            HydrationState::Ready(data) => Ok((hydrator, data)),
            HydrationState::NotFound => anyhow::bail!("Study set '{}' not found", set_id),
            HydrationState::Forbidden => anyhow::bail!("Study set '{}' is private", set_id),
            HydrationState::Failed { message, status } => {
                anyhow::bail!("Failed to load study set '{}' ({}): {}", set_id, status, message)
            }
            HydrationState::Loading | HydrationState::Empty => {
                anyhow::bail!("Study set '{}' is not available yet", set_id)
            }
        }
    }

    /// Write fixture changes back to disk; no-op against the web backend
    pub fn persist(&self) -> Result<()> {
        if let Some((path, memory)) = &self.fixture {
            memory
                .snapshot()
                .save(path)
                .with_context(|| format!("Failed to write fixture {}", path.display()))?;
        }
        Ok(())
    }
}
