// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed configuration records for the runtime.
//!
//! Every tunable lives in one of these structs; nothing in the core reads
//! environment variables. Hosts construct the records (usually from their
//! own config layer) and pass them into the relevant component.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::registry::ServiceRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Human-readable registry name, used in logs and status reports.
    pub registry_name: String,
    /// When true, eager singleton construction at registration is skipped.
    pub lazy_loading: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_name: "default".to_string(),
            lazy_loading: true,
        }
    }
}

/// Configuration for a [`crate::service::ServiceRuntime`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long `stop` waits for in-flight invocations to drain.
    pub drain_timeout: Duration,
    /// Interval between health-monitor snapshots.
    pub health_interval: Duration,
    /// Install SIGTERM/SIGINT handlers on start. Disable in embedded hosts
    /// and tests that manage their own signals.
    pub install_signal_handlers: bool,
    /// Default per-invocation deadline when the event does not carry one.
    pub default_invocation_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
            install_signal_handlers: true,
            default_invocation_timeout: None,
        }
    }
}

/// Configuration for an [`crate::effect::EffectExecutor`].
#[derive(Debug, Clone)]
pub struct EffectConfig {
    /// Cap on concurrently executing effects per node.
    pub max_concurrent_effects: usize,
    /// Default effect deadline in milliseconds.
    pub default_timeout_ms: u64,
    /// Default base delay between retries in milliseconds.
    pub default_retry_delay_ms: u64,
    /// Circuit breaker settings shared by all per-service breakers.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            max_concurrent_effects: 10,
            default_timeout_ms: 30_000,
            default_retry_delay_ms: 1_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker rejects before probing.
    pub recovery_timeout: Duration,
    /// Probe budget while half-open.
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_attempts: 3,
        }
    }
}

/// Policy for a [`crate::cache::ComputeCache`].
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Disabled caches compute every call and report zero entries.
    pub enabled: bool,
    /// Optional entry cap; `None` means no eviction.
    pub max_entries: Option<usize>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: None,
        }
    }
}
