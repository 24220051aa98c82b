//! Read-after-write confirmation.
//!
//! After a create or update succeeds remotely, the local state must be
//! refreshed from the authoritative remote object (assigned identifiers,
//! server-computed defaults). The remote API may lag behind its own writes,
//! so the confirmation read is retried under a read-specific policy. During
//! confirmation *every* read failure is treated as retryable, and so is a
//! snapshot that the caller judges incomplete.
//!
//! Running out of time here does not mean the mutation failed. The result
//! is [`Unconfirmed`], which reports as a warning.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    Attempt, BoundedContext, Diagnostic, Mutation, OperationOutcome, RetryError, RetryExecutor,
    RetryPolicy, UnitOfWork,
};

/// Why a single confirmation read was rejected.
#[derive(Debug, Error)]
pub enum ConfirmFailure<E> {
    #[error("{0}")]
    Read(E),

    #[error("remote state is not yet consistent with the requested change")]
    Stale,
}

/// The mutation succeeded, but its result could not be read back in time.
#[derive(Debug, Error)]
#[error("{mutation} succeeded but state could not be confirmed: {cause}")]
pub struct Unconfirmed<E> {
    pub mutation: Mutation,
    pub cause: RetryError<ConfirmFailure<E>>,
}

impl<E: std::fmt::Display> Unconfirmed<E> {
    /// Warning for the host. Never phrased as a failed mutation.
    pub fn to_diagnostic(&self, resource: &str) -> Diagnostic {
        Diagnostic::warning(
            format!(
                "{resource} {} successfully but state could not be confirmed",
                self.mutation.past_tense()
            ),
            format!(
                "The {} request was accepted by the remote API, but reading it back \
                 did not return a consistent result before the read timeout: {}",
                self.mutation, self.cause
            ),
        )
    }
}

// ---------------------------------------------------------------------------

/// Retries a resource's read path after a mutation until the snapshot is
/// consistent or the read timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadAfterWrite {
    executor: RetryExecutor,
}

impl ReadAfterWrite {
    pub fn new(read_policy: RetryPolicy) -> Self {
        Self {
            executor: RetryExecutor::new(read_policy),
        }
    }

    /// Confirms `mutation` by repeatedly running `read`.
    ///
    /// `is_consistent` decides whether a successful read reflects the change;
    /// pass `|_| true` when any successful read is acceptable.
    pub async fn confirm<W, C>(
        &self,
        ctx: &BoundedContext,
        mutation: Mutation,
        read: &mut W,
        is_consistent: C,
    ) -> Result<W::Output, Unconfirmed<W::Error>>
    where
        W: UnitOfWork + ?Sized,
        C: Fn(&W::Output) -> bool + Send + Sync,
    {
        debug!(%mutation, "confirming mutation with read-after-write");
        let mut work = ConfirmWork {
            read,
            is_consistent,
        };
        match self.executor.run(ctx, &mut work).await {
            Ok(snapshot) => Ok(snapshot),
            Err(cause) => {
                warn!(%mutation, error = %cause, "read-after-write confirmation exhausted");
                Err(Unconfirmed { mutation, cause })
            }
        }
    }
}

struct ConfirmWork<'a, W: ?Sized, C> {
    read: &'a mut W,
    is_consistent: C,
}

#[async_trait]
impl<W, C> UnitOfWork for ConfirmWork<'_, W, C>
where
    W: UnitOfWork + ?Sized,
    C: Fn(&W::Output) -> bool + Send + Sync,
{
    type Output = W::Output;
    type Error = ConfirmFailure<W::Error>;

    async fn attempt(&mut self, attempt: &Attempt) -> OperationOutcome<W::Output, Self::Error> {
        match self.read.attempt(attempt).await {
            OperationOutcome::Success(snapshot) if (self.is_consistent)(&snapshot) => {
                OperationOutcome::Success(snapshot)
            }
            OperationOutcome::Success(_) => OperationOutcome::RetryableFailure(ConfirmFailure::Stale),
            OperationOutcome::RetryableFailure(err) | OperationOutcome::TerminalFailure(err) => {
                OperationOutcome::RetryableFailure(ConfirmFailure::Read(err))
            }
        }
    }
}
