//! Dual-key resolution: identifier first, display name second.
//!
//! Identifiers are the authoritative key but go stale when an object is
//! recreated or renamed out-of-band. When the identifier lookup reports
//! `NotFound`, the resolver retries the same step by name so reconciliation
//! can relocate the object instead of failing permanently. Any other failure
//! from the identifier lookup is returned as-is; the retry executor wrapping
//! the resolver repeats the whole two-step sequence on its next attempt.
//!
//! The same fallback applies to mutations (update by id, then by name) and
//! deletions, so [`KeyedLookup`] is not limited to reads.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{Attempt, Classify, FailureClass, OperationOutcome, ResourceId, ResourceName, UnitOfWork};

/// A keyed remote call that can address its target either way.
#[async_trait]
pub trait KeyedLookup: Send + Sync {
    type Output: Send;
    type Error: Classify + std::fmt::Display + Send;

    async fn by_id(&self, id: &ResourceId) -> Result<Self::Output, Self::Error>;

    async fn by_name(&self, name: &ResourceName) -> Result<Self::Output, Self::Error>;
}

/// Which key located the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Id,
    Name,
}

/// A successful dual-key resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub matched_by: LookupKey,
}

impl<T> Resolved<T> {
    /// Returns `true` if the identifier was stale and the name had to be used.
    pub fn fell_back(&self) -> bool {
        self.matched_by == LookupKey::Name
    }
}

/// Resolves `id`, falling back to `name` when the identifier is not found.
///
/// When `name` is `None` the identifier failure is returned directly.
pub async fn resolve<L>(
    lookup: &L,
    id: &ResourceId,
    name: Option<&ResourceName>,
) -> Result<Resolved<L::Output>, L::Error>
where
    L: KeyedLookup + ?Sized,
{
    let primary = match lookup.by_id(id).await {
        Ok(value) => {
            return Ok(Resolved {
                value,
                matched_by: LookupKey::Id,
            })
        }
        Err(err) => err,
    };

    if primary.classify() != FailureClass::NotFound {
        debug!(%id, error = %primary, "identifier lookup failed; not falling back");
        return Err(primary);
    }

    let Some(name) = name else {
        debug!(%id, "identifier not found and no name to fall back on");
        return Err(primary);
    };

    info!(%id, %name, "identifier not found; falling back to name");
    lookup.by_name(name).await.map(|value| Resolved {
        value,
        matched_by: LookupKey::Name,
    })
}

// ---------------------------------------------------------------------------

/// Adapts a dual-key resolution into a [`UnitOfWork`] so it can be retried.
///
/// Retryable failures are retried; `NotFound` after the fallback and terminal
/// failures end the loop.
#[derive(Debug)]
pub struct ResolveWork<'a, L: ?Sized> {
    lookup: &'a L,
    id: &'a ResourceId,
    name: Option<&'a ResourceName>,
}

impl<'a, L: ?Sized> ResolveWork<'a, L> {
    pub fn new(lookup: &'a L, id: &'a ResourceId, name: Option<&'a ResourceName>) -> Self {
        Self { lookup, id, name }
    }
}

#[async_trait]
impl<L> UnitOfWork for ResolveWork<'_, L>
where
    L: KeyedLookup + ?Sized,
{
    type Output = Resolved<L::Output>;
    type Error = L::Error;

    async fn attempt(&mut self, _attempt: &Attempt) -> OperationOutcome<Self::Output, L::Error> {
        OperationOutcome::from_result(resolve(self.lookup, self.id, self.name).await)
    }
}
