#![forbid(unsafe_code)]

pub mod accounting;
pub mod alerts;
pub mod background;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod limiter;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod window;

pub use accounting::QuotaAccountant;
pub use config::{load_from_path, Config};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use identity::{AuthError, Identity, RequestMetadata, Scope, Tier};
pub use limiter::{Decision, RateLimitError, RateLimiter};
pub use store::{QuotaStore, StoreError, StoreHandles};
pub use window::Window;
