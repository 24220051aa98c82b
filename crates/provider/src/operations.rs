//! Generic create, read, update and delete for any resource type.
//!
//! Every operation follows the same shape:
//!
//! 1. Resolve the effective timeout (per-instance override, else the
//!    per-type default, else the provider-wide default) and derive a bounded
//!    context from the caller's. An unparseable override aborts here.
//! 2. Run the remote call under the [`RetryExecutor`], addressing the object
//!    by identifier first and by name when the identifier no longer resolves.
//! 3. For create and update, confirm the result with a read-after-write loop
//!    bounded by the *read* timeout, then flatten the remote object into state.
//!
//! Findings are returned as [`Diagnostics`]. A terminal failure reads
//! "Failed to ...", running out of time reads "Timed out trying to ...", and a
//! mutation whose confirmation read never came back consistent is a warning.

use std::fmt::Display;

use async_trait::async_trait;
use reconcile::{
    resolve_timeout, Attempt, BoundedContext, CancelHandle, Diagnostic, Diagnostics, KeyedLookup,
    Mutation, OperationId, OperationKind, OperationOutcome, OperationTimeouts, ReadAfterWrite,
    ResolveWork, Resolved, ResourceId, ResourceName, ResourceType, RetryError, RetryExecutor,
    RetryPolicy, TimeoutConfig, UnitOfWork,
};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::{ResourceClient, ResourceMapper, ResourceState};

/// Provider-wide knobs shared by every resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSettings {
    /// Default timeouts, per operation and per resource type.
    pub timeouts: TimeoutConfig,
    /// Backoff for create, update and delete calls.
    pub mutation_policy: RetryPolicy,
    /// Backoff for plain reads.
    pub read_policy: RetryPolicy,
    /// Backoff for read-after-write confirmation.
    pub confirm_policy: RetryPolicy,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            mutation_policy: RetryPolicy::default(),
            read_policy: RetryPolicy::default(),
            confirm_policy: RetryPolicy::read_after_write(),
        }
    }
}

impl OperationSettings {
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }
}

// ---------------------------------------------------------------------------
// ResourceOperations
// ---------------------------------------------------------------------------

/// The four host-driven operations for one resource type.
pub struct ResourceOperations<C, M> {
    client: C,
    mapper: M,
    settings: OperationSettings,
}

impl<C, M> ResourceOperations<C, M>
where
    C: ResourceClient,
    M: ResourceMapper<Payload = C::Payload, Remote = C::Remote>,
{
    pub fn new(client: C, mapper: M, settings: OperationSettings) -> Self {
        Self {
            client,
            mapper,
            settings,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &OperationSettings {
        &self.settings
    }

    fn resource_type(&self) -> &ResourceType {
        self.mapper.resource_type()
    }

    /// Creates the remote object described by `state` and records its
    /// identifier and attributes.
    pub async fn create(
        &self,
        ctx: &BoundedContext,
        state: &mut ResourceState,
        timeouts: &OperationTimeouts,
    ) -> Diagnostics {
        let span = self.span(OperationKind::Create, state);
        async {
            let mut diags = Diagnostics::new();
            let Some((op_ctx, release)) = self.bound(ctx, OperationKind::Create, timeouts, &mut diags)
            else {
                return diags;
            };

            let payload = match self.mapper.construct(state) {
                Ok(payload) => payload,
                Err(found) => {
                    diags.append(found);
                    return diags;
                }
            };

            let mut work = Submit {
                client: &self.client,
                payload: &payload,
            };
            let created = match executor(self.settings.mutation_policy, &op_ctx)
                .run(&op_ctx, &mut work)
                .await
            {
                Ok(remote) => remote,
                Err(err) => {
                    diags.push(failure(
                        ctx,
                        OperationKind::Create,
                        &self.resource_type().to_string(),
                        &err,
                    ));
                    return diags;
                }
            };
            release.cancel();

            let Some(id) = self.mapper.remote_id(&created) else {
                error!("create response carried no identifier");
                diags.add_error(
                    format!(
                        "{} created but the response carried no identifier",
                        self.resource_type()
                    ),
                    "The remote API accepted the request, but without an identifier the \
                     object cannot be tracked. It may need to be imported or removed by hand.",
                );
                return diags;
            };
            state.set_id(&id);
            info!(resource_id = %id, "created");

            self.confirm(ctx, Mutation::Create, state, timeouts, created, &mut diags)
                .await;
            diags
        }
        .instrument(span)
        .await
    }

    /// Refreshes `state` from the remote object.
    ///
    /// An object that only resolves by name has its identifier updated. An
    /// object that resolves by neither key is removed from state.
    pub async fn read(
        &self,
        ctx: &BoundedContext,
        state: &mut ResourceState,
        timeouts: &OperationTimeouts,
    ) -> Diagnostics {
        let span = self.span(OperationKind::Read, state);
        async {
            let mut diags = Diagnostics::new();
            let Some((op_ctx, _release)) = self.bound(ctx, OperationKind::Read, timeouts, &mut diags)
            else {
                return diags;
            };
            let Some(id) = self.require_id(OperationKind::Read, state, &mut diags) else {
                return diags;
            };
            let subject = format!("{} {id}", self.resource_type());
            let name = state.name();

            let lookup = Fetch {
                client: &self.client,
            };
            let mut work = ResolveWork::new(&lookup, &id, name.as_ref());
            match executor(self.settings.read_policy, &op_ctx)
                .run(&op_ctx, &mut work)
                .await
            {
                Ok(resolved) => {
                    self.adopt(&resolved, state, &mut diags);
                    diags.append(self.mapper.flatten(&resolved.value, state));
                    debug!("read");
                }
                Err(err) if err.is_not_found() => {
                    warn!(resource_id = %id, "remote object is gone; removing from state");
                    diags.add_warning(
                        format!("{subject} not found; removing from state"),
                        "The object no longer resolves by identifier or by name. \
                         It will be planned for creation again.",
                    );
                    state.remove_from_state();
                }
                Err(err) => diags.push(failure(ctx, OperationKind::Read, &subject, &err)),
            }
            diags
        }
        .instrument(span)
        .await
    }

    /// Pushes the desired `state` to the remote object and confirms it.
    pub async fn update(
        &self,
        ctx: &BoundedContext,
        state: &mut ResourceState,
        timeouts: &OperationTimeouts,
    ) -> Diagnostics {
        let span = self.span(OperationKind::Update, state);
        async {
            let mut diags = Diagnostics::new();
            let Some((op_ctx, release)) = self.bound(ctx, OperationKind::Update, timeouts, &mut diags)
            else {
                return diags;
            };
            let Some(id) = self.require_id(OperationKind::Update, state, &mut diags) else {
                return diags;
            };
            let subject = format!("{} {id}", self.resource_type());

            let payload = match self.mapper.construct(state) {
                Ok(payload) => payload,
                Err(found) => {
                    diags.append(found);
                    return diags;
                }
            };

            let name = state.name();
            let lookup = Amend {
                client: &self.client,
                payload: &payload,
            };
            let mut work = ResolveWork::new(&lookup, &id, name.as_ref());
            let updated = match executor(self.settings.mutation_policy, &op_ctx)
                .run(&op_ctx, &mut work)
                .await
            {
                Ok(resolved) => resolved,
                Err(err) => {
                    diags.push(failure(ctx, OperationKind::Update, &subject, &err));
                    return diags;
                }
            };
            release.cancel();
            info!(resource_id = %id, matched_by = ?updated.matched_by, "updated");

            self.adopt(&updated, state, &mut diags);
            self.confirm(ctx, Mutation::Update, state, timeouts, updated.value, &mut diags)
                .await;
            diags
        }
        .instrument(span)
        .await
    }

    /// Deletes the remote object and clears `state`.
    ///
    /// An object that resolves by neither key is treated as already deleted.
    pub async fn delete(
        &self,
        ctx: &BoundedContext,
        state: &mut ResourceState,
        timeouts: &OperationTimeouts,
    ) -> Diagnostics {
        let span = self.span(OperationKind::Delete, state);
        async {
            let mut diags = Diagnostics::new();
            let Some((op_ctx, _release)) = self.bound(ctx, OperationKind::Delete, timeouts, &mut diags)
            else {
                return diags;
            };
            let Some(id) = state.id() else {
                debug!("no identifier in state; nothing to delete");
                state.remove_from_state();
                return diags;
            };
            let subject = format!("{} {id}", self.resource_type());
            let name = state.name();

            let lookup = Remove {
                client: &self.client,
            };
            let mut work = ResolveWork::new(&lookup, &id, name.as_ref());
            match executor(self.settings.mutation_policy, &op_ctx)
                .run(&op_ctx, &mut work)
                .await
            {
                Ok(resolved) => {
                    info!(resource_id = %id, matched_by = ?resolved.matched_by, "deleted");
                    state.remove_from_state();
                }
                Err(err) if err.is_not_found() => {
                    warn!(resource_id = %id, "remote object already gone");
                    diags.add_warning(
                        format!("{subject} was already deleted"),
                        "The object did not resolve by identifier or by name; \
                         it has been removed from state.",
                    );
                    state.remove_from_state();
                }
                Err(err) => diags.push(failure(ctx, OperationKind::Delete, &subject, &err)),
            }
            diags
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    fn span(&self, operation: OperationKind, state: &ResourceState) -> Span {
        info_span!(
            "resource_operation",
            operation_id = %OperationId::new_random(),
            operation = %operation,
            resource_type = %self.resource_type(),
            resource_id = %state.id_label(),
        )
    }

    /// Resolves the operation's timeout into a bounded context, or `None`
    /// when the configured override is invalid.
    fn bound(
        &self,
        ctx: &BoundedContext,
        operation: OperationKind,
        timeouts: &OperationTimeouts,
        diags: &mut Diagnostics,
    ) -> Option<(BoundedContext, CancelHandle)> {
        let default = self.settings.timeouts.timeout_for(self.resource_type(), operation);
        let configured = timeouts.get(operation);
        match resolve_timeout(ctx, |d| configured.resolve(d), default, diags) {
            (bounded, Some(release)) => Some((bounded, release)),
            (_, None) => {
                error!(%operation, "invalid timeout configuration; operation aborted");
                None
            }
        }
    }

    fn require_id(
        &self,
        operation: OperationKind,
        state: &ResourceState,
        diags: &mut Diagnostics,
    ) -> Option<ResourceId> {
        let id = state.id();
        if id.is_none() {
            diags.add_error(
                format!("Failed to {operation} {}", self.resource_type()),
                "The resource has no identifier in state.",
            );
        }
        id
    }

    /// Records the current identifier when the object was located by name.
    fn adopt(&self, resolved: &Resolved<C::Remote>, state: &mut ResourceState, diags: &mut Diagnostics) {
        if !resolved.fell_back() {
            return;
        }
        let Some(current) = self.mapper.remote_id(&resolved.value) else {
            return;
        };
        if state.id().as_ref() == Some(&current) {
            return;
        }

        let stale = state.id_label();
        warn!(stale_id = %stale, resource_id = %current, "identifier was stale; relocated by name");
        diags.add_warning(
            format!("{} {stale} was found by name", self.resource_type()),
            format!(
                "The identifier {stale} no longer resolves. The object was located by its \
                 name and its identifier has been updated to {current}."
            ),
        );
        state.set_id(&current);
    }

    /// Reads the object back after `mutation` and flattens the result.
    ///
    /// Runs under the read timeout, derived from the caller's context rather
    /// than the mutation's. If the read never comes back consistent the
    /// `written` response is flattened instead and a warning is recorded.
    async fn confirm(
        &self,
        root: &BoundedContext,
        mutation: Mutation,
        state: &mut ResourceState,
        timeouts: &OperationTimeouts,
        written: C::Remote,
        diags: &mut Diagnostics,
    ) {
        let default = self
            .settings
            .timeouts
            .timeout_for(self.resource_type(), OperationKind::Read);
        let (read_timeout, found) = timeouts.read.resolve(default);
        for invalid in found {
            diags.add_warning(
                invalid.summary,
                format!("{}; confirmed using the default read timeout.", invalid.detail),
            );
        }

        let Some(id) = state.id() else {
            return;
        };
        let name = state.name();
        let (confirm_ctx, _release) = root.with_timeout(read_timeout);
        let reader = ReadAfterWrite::new(self.settings.confirm_policy.with_operation_timeout(read_timeout));

        let lookup = Fetch {
            client: &self.client,
        };
        let mut read = ResolveWork::new(&lookup, &id, name.as_ref());
        let desired: &ResourceState = state;
        let confirmed = reader
            .confirm(&confirm_ctx, mutation, &mut read, |resolved: &Resolved<C::Remote>| {
                self.mapper.is_consistent(&resolved.value, desired)
            })
            .await;

        match confirmed {
            Ok(resolved) => {
                debug!(%mutation, "confirmed");
                self.adopt(&resolved, state, diags);
                diags.append(self.mapper.flatten(&resolved.value, state));
            }
            Err(unconfirmed) => {
                diags.push(unconfirmed.to_diagnostic(self.resource_type().as_str()));
                diags.append(self.mapper.flatten(&written, state));
            }
        }
    }
}

/// Executor whose budget is whatever is left of `ctx`.
fn executor(policy: RetryPolicy, ctx: &BoundedContext) -> RetryExecutor {
    let budget = ctx.remaining().unwrap_or_else(|| policy.operation_timeout());
    RetryExecutor::new(policy.with_operation_timeout(budget))
}

/// Error diagnostic for a retry loop that ended without success.
///
/// `ctx` is the caller's context. A loop cut short by its cancellation is
/// reported as cancelled rather than timed out; terminal failures keep their
/// own summary.
fn failure<E: Display>(
    ctx: &BoundedContext,
    operation: OperationKind,
    subject: &str,
    err: &RetryError<E>,
) -> Diagnostic {
    if ctx.is_cancelled() && !matches!(err, RetryError::Terminal { .. }) {
        warn!(%operation, attempts = err.attempts(), error = %err, "operation cancelled");
        return Diagnostic::error(
            format!("Cancelled while trying to {operation} {subject}"),
            err.to_string(),
        );
    }
    match err {
        RetryError::Terminal { attempts, error } => {
            error!(%operation, attempts, %error, "operation failed");
            Diagnostic::error(format!("Failed to {operation} {subject}"), error.to_string())
        }
        RetryError::AttemptsExhausted { attempts, .. } => {
            error!(%operation, attempts, error = %err, "operation ran out of retries");
            Diagnostic::error(format!("Gave up trying to {operation} {subject}"), err.to_string())
        }
        _ => {
            error!(%operation, attempts = err.attempts(), error = %err, "operation timed out");
            Diagnostic::error(format!("Timed out trying to {operation} {subject}"), err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Client adapters
// ---------------------------------------------------------------------------

struct Submit<'a, C: ResourceClient> {
    client: &'a C,
    payload: &'a C::Payload,
}

#[async_trait]
impl<'a, C: ResourceClient> UnitOfWork for Submit<'a, C> {
    type Output = C::Remote;
    type Error = C::Error;

    async fn attempt(&mut self, _attempt: &Attempt) -> OperationOutcome<C::Remote, C::Error> {
        OperationOutcome::from_result(self.client.create(self.payload).await)
    }
}

struct Fetch<'a, C> {
    client: &'a C,
}

#[async_trait]
impl<'a, C: ResourceClient> KeyedLookup for Fetch<'a, C> {
    type Output = C::Remote;
    type Error = C::Error;

    async fn by_id(&self, id: &ResourceId) -> Result<C::Remote, C::Error> {
        self.client.get_by_id(id).await
    }

    async fn by_name(&self, name: &ResourceName) -> Result<C::Remote, C::Error> {
        self.client.get_by_name(name).await
    }
}

struct Amend<'a, C: ResourceClient> {
    client: &'a C,
    payload: &'a C::Payload,
}

#[async_trait]
impl<'a, C: ResourceClient> KeyedLookup for Amend<'a, C> {
    type Output = C::Remote;
    type Error = C::Error;

    async fn by_id(&self, id: &ResourceId) -> Result<C::Remote, C::Error> {
        self.client.update_by_id(id, self.payload).await
    }

    async fn by_name(&self, name: &ResourceName) -> Result<C::Remote, C::Error> {
        self.client.update_by_name(name, self.payload).await
    }
}

struct Remove<'a, C> {
    client: &'a C,
}

#[async_trait]
impl<'a, C: ResourceClient> KeyedLookup for Remove<'a, C> {
    type Output = ();
    type Error = C::Error;

    async fn by_id(&self, id: &ResourceId) -> Result<(), C::Error> {
        self.client.delete_by_id(id).await
    }

    async fn by_name(&self, name: &ResourceName) -> Result<(), C::Error> {
        self.client.delete_by_name(name).await
    }
}
