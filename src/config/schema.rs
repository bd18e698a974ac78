//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both halves
//! of the proxy pair. All types derive Serde traits for deserialization from
//! config files, and every section falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the prefetch proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PrefetchProxyConfig {
    /// Server-side document discovery and speculative fetching.
    pub prefetch: PrefetchConfig,

    /// Push channel (both sender and receiver side).
    pub push: PushConfig,

    /// Client-side racing behaviour.
    pub racing: RacingConfig,

    /// RFC 7234 response cache used by speculative fetches.
    pub http_cache: HttpCacheConfig,

    /// Timeout configuration for outbound HTTP.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server-side prefetch orchestration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// How long a document URL suppresses repeated discovery, in seconds.
    pub document_throttle_secs: u64,

    /// Maximum speculative fetches in flight per orchestrator (0 = unbounded).
    pub max_concurrent_fetches: usize,

    /// Maximum number of decoded document bytes scanned for a `<head>` section.
    pub head_read_limit: usize,

    /// Path extensions (without the dot) treated as prefetchable resources.
    pub resource_extensions: Vec<String>,
}

impl PrefetchConfig {
    pub fn document_throttle(&self) -> Duration {
        Duration::from_secs(self.document_throttle_secs)
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            document_throttle_secs: 5,
            max_concurrent_fetches: 64,
            head_read_limit: 128 * 1024,
            resource_extensions: vec!["js".to_string(), "css".to_string()],
        }
    }
}

/// Push channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PushConfig {
    /// Lifetime of an arrived-but-unconsumed push, in seconds.
    pub response_ttl_secs: u64,

    /// Delay before the receiver re-dials a failed push session, in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Capacity of the queue between the receiver and the response cache.
    pub queue_capacity: usize,

    /// Largest header record the receiver accepts, in bytes.
    pub max_record_bytes: usize,

    /// Interval of the background sweep over expired pushes, in seconds.
    pub purge_interval_secs: u64,
}

impl PushConfig {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            response_ttl_secs: 10,
            reconnect_delay_ms: 1000,
            queue_capacity: 16,
            max_record_bytes: 16 * 1024 * 1024,
            purge_interval_secs: 5,
        }
    }
}

/// Client-side racing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RacingConfig {
    /// How long the push path may still win once the direct path failed or
    /// answered with the transient status, in milliseconds.
    pub push_grace_ms: u64,

    /// How many times a direct fetch is re-issued after the transient status.
    pub transient_retries: u32,
}

impl RacingConfig {
    pub fn push_grace(&self) -> Duration {
        Duration::from_millis(self.push_grace_ms)
    }
}

impl Default for RacingConfig {
    fn default() -> Self {
        Self {
            push_grace_ms: 3000,
            transient_retries: 2,
        }
    }
}

/// RFC 7234 cache in front of speculative fetches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// Enable the cache.
    pub enabled: bool,

    /// Responses with larger bodies are passed through uncached.
    pub max_body_bytes: usize,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for outbound HTTP.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time until response headers arrive, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
