//! Generic resource operations for a declarative-infrastructure provider.
//!
//! Each managed resource type supplies a [`ResourceClient`] (its remote API)
//! and a [`ResourceMapper`] (state ↔ payload conversion). [`ResourceOperations`]
//! combines them with the [`reconcile`] engine into create, read, update and
//! delete calls that retry transient failures, fall back from stale
//! identifiers to display names, and confirm mutations by reading them back.
//!
//! ## Architectural Layer
//!
//! **Adapter layer.** Owns the host-facing attribute store and logging
//! bootstrap; all retry and resolution rules live in `reconcile`.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ports`] | `ResourceClient` and `ResourceMapper` traits |
//! | [`state`] | `ResourceState`, the host's attribute store |
//! | [`operations`] | `ResourceOperations` and `OperationSettings` |
//! | [`telemetry`] | `tracing-subscriber` initialisation |

pub mod operations;
pub mod ports;
pub mod state;
pub mod telemetry;

pub use operations::{OperationSettings, ResourceOperations};
pub use ports::{ResourceClient, ResourceMapper};
pub use state::{ResourceState, StateError, ID_ATTRIBUTE, NAME_ATTRIBUTE};
pub use telemetry::{LogFormat, UnknownLogFormat};
