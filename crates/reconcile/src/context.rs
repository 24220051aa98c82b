//! Cancellable, deadline-bearing execution contexts.
//!
//! A [`BoundedContext`] says "this operation must finish, or be abandoned, by
//! time T". Contexts form a tree: deriving a child with
//! [`BoundedContext::with_timeout`] produces a context that expires at the
//! earlier of the parent's deadline and its own, and that is cancelled
//! whenever the parent is. The [`CancelHandle`] returned alongside a child
//! releases it; dropping the handle cancels the child, so every exit path of
//! the owning scope releases the context.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// A cancellable handle with an optional deadline.
///
/// Cloning is cheap; clones share the same cancellation state.
#[derive(Debug, Clone)]
pub struct BoundedContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl BoundedContext {
    /// A root context with no deadline that is never cancelled on its own.
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// A root context driven by a host-owned cancellation token (e.g. the
    /// token cancelled when the user aborts an apply).
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            token,
        }
    }

    /// Derives a child context that expires `timeout` from now, or at the
    /// parent's deadline if that is earlier.
    ///
    /// A zero `timeout` yields a context that is already expired. A `timeout`
    /// too large for the clock to represent adds no deadline of its own; the
    /// child keeps the parent's deadline, if any.
    pub fn with_timeout(&self, timeout: Duration) -> (BoundedContext, CancelHandle) {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (Some(parent), None) => Some(parent),
            (None, own) => own,
        };
        let token = self.token.child_token();
        let handle = CancelHandle {
            guard: token.clone().drop_guard(),
        };
        (
            BoundedContext { deadline, token },
            handle,
        )
    }

    /// Deadline of this context, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if there is no deadline.
    ///
    /// Returns [`Duration::ZERO`] once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` if the context has been cancelled or its deadline has
    /// been reached.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `true` only if the context was cancelled explicitly (as opposed
    /// to reaching its deadline).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token backing this context. Remote client implementations race
    /// their in-flight requests against it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the context is cancelled or its deadline is reached.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

/// Releases a derived [`BoundedContext`].
///
/// Dropping the handle cancels the context it was created with, along with
/// every context derived from it. Parents are never affected.
#[derive(Debug)]
#[must_use = "dropping the handle cancels the context immediately"]
pub struct CancelHandle {
    guard: DropGuard,
}

impl CancelHandle {
    /// Cancels the associated context now.
    pub fn cancel(self) {
        drop(self.guard);
    }
}
