//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PrefetchProxyConfig (validated, immutable)
//!     → sections cloned into the subsystems that own them
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::HttpCacheConfig;
pub use schema::ObservabilityConfig;
pub use schema::PrefetchConfig;
pub use schema::PrefetchProxyConfig;
pub use schema::PushConfig;
pub use schema::RacingConfig;
pub use schema::TimeoutConfig;
