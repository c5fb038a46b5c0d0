// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Monadic result type and composition combinators.
//!
//! [`NodeResult`] is the typed success/failure sum every node operation
//! produces; [`Composer`] provides sequence, parallel, retry, conditional,
//! and pipeline composition over it. Combinators return `Failure` instead
//! of raising; errors surface at the dispatcher boundary only.

mod compose;
mod result;

pub use compose::{op, Composer, Op, RetryOptions, RetryPredicate};
pub use result::{
    BackoffStrategy, EmittedEvent, ErrorInfo, ErrorKind, ExecutionContext, LogEntry, LogLevel,
    NodeResult,
};
