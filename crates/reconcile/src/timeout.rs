//! Resolution of the effective timeout for one resource operation.

use std::time::Duration;

use tracing::debug;

use crate::{BoundedContext, CancelHandle, Diagnostics};

/// Derives the bounded context for one operation.
///
/// `compute` is the user-supplied timeout computation (typically
/// [`crate::TimeoutOverride::resolve`]). It is invoked exactly once with
/// `default` and returns the effective duration together with any
/// diagnostics it produced. All of those diagnostics are appended to
/// `diagnostics`.
///
/// If the computation reported an error, the caller's context is returned
/// unchanged together with `None`: no bounded context is available and the
/// operation must abort. Otherwise the returned context expires `duration`
/// from now; a zero duration is valid and yields an already-expired context.
///
/// The returned [`CancelHandle`] must be held for the whole operation.
/// Dropping it releases the context.
pub fn resolve_timeout<F>(
    ctx: &BoundedContext,
    compute: F,
    default: Duration,
    diagnostics: &mut Diagnostics,
) -> (BoundedContext, Option<CancelHandle>)
where
    F: FnOnce(Duration) -> (Duration, Diagnostics),
{
    let (timeout, computed) = compute(default);
    let failed = computed.has_error();
    diagnostics.append(computed);

    if failed {
        debug!(?default, "timeout computation failed; no bounded context");
        return (ctx.clone(), None);
    }

    debug!(?timeout, "bounded operation context");
    let (bounded, handle) = ctx.with_timeout(timeout);
    (bounded, Some(handle))
}
