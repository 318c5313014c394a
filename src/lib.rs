pub mod config;
pub mod gateway;
pub mod hydrate;
pub mod session;
pub mod sets;

pub use config::{ClientConfig, ConfigError};
pub use gateway::{Gateway, GatewayError, GatewayResult, HttpGateway, MemoryGateway};
pub use hydrate::{AuthStatus, HydrateOptions, HydrationState, SetData, SetHydrator};
pub use session::{SessionError, SessionPhase};
