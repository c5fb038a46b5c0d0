// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # NodeFlow
//!
//! Distributed node runtime: independent nodes register with a service
//! registry, discover one another through a signed catalog (see the
//! `nodeflow-catalog` crate), and interact by publishing tool-invocation
//! events on a bus.
//!
//! The crate is organised around the node lifecycle:
//!
//! - [`registry`] - dependency-injection container with lifecycle
//!   bookkeeping and status reporting
//! - [`bus`] - the event-bus seam and wire-shaped events
//! - [`service`] - the long-lived service runtime and invocation dispatch
//! - [`effect`] - transactional side effects, retries, circuit breakers
//! - [`cache`] - fingerprint-keyed compute cache with singleflight
//! - [`monadic`] - `NodeResult` and composition combinators
//! - [`reducer`] - pure FSM reduction emitting ordered intents
//! - [`merge`] - deterministic conflict classification
//! - [`manifest`] - structured execution traces
//! - [`discovery`] - explicit tool-resolution strategies
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nodeflow::prelude::*;
//!
//! let node = ServiceNode::builder("indexer")
//!     .tool(ToolSpec::new("index").with_action("rebuild"))
//!     .handler(Arc::new(FnToolHandler::new(|input| async move {
//!         Ok(serde_json::json!({"indexed": true}))
//!     })))
//!     .build()?;
//!
//! let runtime = ServiceRuntime::new(node, bus, ServiceConfig::default());
//! runtime.start().await?;
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod effect;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod monadic;
pub mod reducer;
pub mod registry;
pub mod service;

pub use error::{Error, Result};

/// Convenient single import for hosts.
pub mod prelude {
    pub use crate::bus::{
        BusEvent, EventBus, NodeIntrospectionEvent, NodeShutdownEvent, SharedEventBus,
        ToolInvocationEvent, ToolResponseEvent, ToolSpec, Topic,
    };
    pub use crate::cache::{fingerprint, CacheStats, ComputeCache};
    pub use crate::config::{
        CachePolicy, CircuitBreakerConfig, EffectConfig, RegistryConfig, ServiceConfig,
    };
    pub use crate::effect::{
        EffectExecutor, EffectInput, EffectOutput, EffectType, Transaction, TransactionState,
    };
    pub use crate::error::{Error, Result};
    pub use crate::manifest::{ExecutionManifest, HookStatus, ManifestGenerator};
    pub use crate::merge::{ConflictClassifier, ConflictType};
    pub use crate::monadic::{Composer, ErrorInfo, ErrorKind, NodeResult};
    pub use crate::reducer::{process, ProjectionIntent, Reducer, ReducerIntent};
    pub use crate::registry::{InjectionScope, ServiceLifecycle, ServiceRegistry};
    pub use crate::service::{
        BlockingToolHandler, FnToolHandler, ServiceNode, ServiceRuntime, ToolHandler, ToolInput,
    };
}
