//! Ports a concrete resource type plugs into [`crate::ResourceOperations`].
//!
//! [`ResourceClient`] is the remote management API for one resource type;
//! [`ResourceMapper`] converts between host state and that API's payloads.
//! Both are injected through constructors. There is no global client.

use std::fmt::Display;

use async_trait::async_trait;
use reconcile::{Classify, Diagnostics, ResourceId, ResourceName, ResourceType};

use crate::ResourceState;

/// Remote API calls for one resource type.
///
/// Every keyed call comes in two forms so the engine can fall back from a
/// stale identifier to the display name.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Request body for create and update.
    type Payload: Send + Sync;
    /// The remote object as returned by the API.
    type Remote: Send;
    type Error: Classify + Display + Send + Sync;

    async fn create(&self, payload: &Self::Payload) -> Result<Self::Remote, Self::Error>;

    async fn get_by_id(&self, id: &ResourceId) -> Result<Self::Remote, Self::Error>;

    async fn get_by_name(&self, name: &ResourceName) -> Result<Self::Remote, Self::Error>;

    async fn update_by_id(
        &self,
        id: &ResourceId,
        payload: &Self::Payload,
    ) -> Result<Self::Remote, Self::Error>;

    async fn update_by_name(
        &self,
        name: &ResourceName,
        payload: &Self::Payload,
    ) -> Result<Self::Remote, Self::Error>;

    async fn delete_by_id(&self, id: &ResourceId) -> Result<(), Self::Error>;

    async fn delete_by_name(&self, name: &ResourceName) -> Result<(), Self::Error>;
}

/// Converts between host state and remote payloads for one resource type.
pub trait ResourceMapper: Send + Sync {
    type Payload;
    type Remote;

    fn resource_type(&self) -> &ResourceType;

    /// Builds the request body from desired state. Failures are reported as
    /// diagnostics and stop the operation before any remote call.
    fn construct(&self, state: &ResourceState) -> Result<Self::Payload, Diagnostics>;

    /// Writes the remote object's attributes into `state`.
    fn flatten(&self, remote: &Self::Remote, state: &mut ResourceState) -> Diagnostics;

    fn remote_id(&self, remote: &Self::Remote) -> Option<ResourceId>;

    /// Whether a confirmation read reflects the desired state. The default
    /// accepts any successful read.
    fn is_consistent(&self, _remote: &Self::Remote, _desired: &ResourceState) -> bool {
        true
    }
}
