mod alerts;
mod identity;
mod loader;
mod root;
mod signer;
mod store;
mod telemetry;
mod timeout;

pub use alerts::{AlertRuleConfig, AlertsConfig, WebhookConfig};
pub use identity::{CredentialEntry, IdentityConfig};
pub use loader::{load_from_path, load_from_str};
pub use root::{Config, LimitsConfig};
pub use signer::SignerConfig;
pub use store::{AccountingConfig, StoreBackend, StoreConfig};
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::{KeepAliveConfig, TimeoutConfig};
