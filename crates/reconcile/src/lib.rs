//! Reconciliation engine for declarative infrastructure resources.
//!
//! Remote management APIs are eventually consistent: a freshly created object
//! may not be readable for a while, identifiers go stale when objects are
//! recreated out-of-band, and transient faults are routine. This crate holds
//! the pieces every resource operation uses to cope with that, independent of
//! any particular resource type or transport.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no network I/O.
//! Remote calls are supplied by callers through [`UnitOfWork`] and
//! [`KeyedLookup`]; tokio is used only for timers and cancellation.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype keys (`ResourceId`, `ResourceName`, `ResourceType`, `OperationId`) |
//! | [`types`] | `Diagnostic`, `Diagnostics`, `Attempt`, `OperationKind`, `Timestamp` |
//! | [`errors`] | Failure classification, `OperationOutcome`, `RetryError` |
//! | [`backoff`] | `RetryPolicy` and its deterministic backoff |
//! | [`context`] | `BoundedContext` deadlines and cancellation |
//! | [`timeout`] | Effective-timeout resolution for one operation |
//! | [`config`] | Duration parsing, per-instance and provider-wide timeouts |
//! | [`retry`] | `RetryExecutor` and the `UnitOfWork` trait |
//! | [`resolver`] | Identifier-then-name lookup |
//! | [`reconcile`] | Read-after-write confirmation |
//! | [`shard`] | Bulk identifier sharding |

pub mod backoff;
pub mod config;
pub mod context;
pub mod errors;
pub mod identifiers;
pub mod reconcile;
pub mod resolver;
pub mod retry;
pub mod shard;
pub mod timeout;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use backoff::{PolicyError, RetryPolicy, DEFAULT_OPERATION_TIMEOUT};
pub use config::{
    parse_duration, ConfigError, OperationTimeouts, ResourceTimeouts, TimeoutConfig,
    TimeoutDefaults, TimeoutOverride, MAX_DURATION,
};
pub use context::{BoundedContext, CancelHandle};
pub use errors::{classify_status, ApiError, Classify, FailureClass, OperationOutcome, RetryError};
pub use identifiers::{BlankKey, OperationId, ResourceId, ResourceName, ResourceType};
pub use reconcile::{ConfirmFailure, ReadAfterWrite, Unconfirmed};
pub use resolver::{resolve, KeyedLookup, LookupKey, ResolveWork, Resolved};
pub use retry::{RetryExecutor, UnitOfWork};
pub use shard::{
    parse_size_plan, shard_by_percentage, shard_by_rendezvous, shard_by_size, shard_round_robin,
    Shard, ShardError, ShardSize,
};
pub use timeout::resolve_timeout;
pub use types::{
    Attempt, Diagnostic, DiagnosticSeverity, Diagnostics, Mutation, OperationKind, Timestamp,
};
