// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Sequential execution of one request's invocations.
//!
//! A batch moves through `Admitting -> Executing(i) -> Assembling -> Done`; it can only be
//! `Rejected` while admitting. Invocations never overlap within a batch. Distinct batches run
//! concurrently and only meet inside the [`StateStore`].

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use super::created_ids::{CreatedIds, DuplicateCreationId};
use super::dispatch::{
    MethodContext, MethodDispatcher, MethodHandler, MethodOutcome, MethodSuccess, ObjectLimit,
    StateView,
};
use super::reference::resolve_arguments;
use crate::capability::{CapabilityRegistry, Limit, LimitName, SharedRegistry};
use crate::model::{
    AccountId, Arguments, CallId, Invocation, InvocationResult, MethodError, MethodErrorType,
    Request, RequestError, RequestErrorType, Response, StateChange,
};
use crate::session::{batch_state, topology_state, AccountDirectory};
use crate::store::{StateStore, StateStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Admitting,
    Executing(usize),
    Assembling,
    Done,
    Rejected,
}

impl BatchPhase {
    fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Admitting, Self::Executing(0) | Self::Assembling | Self::Rejected) => true,
            (Self::Executing(i), Self::Executing(j)) => j == i + 1,
            (Self::Executing(_), Self::Assembling) => true,
            (Self::Assembling, Self::Done) => true,
            _ => false,
        }
    }
}

/// Response plus the state changes the batch committed, for push fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub response: Response,
    pub changes: Option<StateChange>,
    pub phase: BatchPhase,
}

/// Failure that ends the batch instead of becoming a method error.
#[derive(Debug)]
enum BatchFault {
    StateStore { call_id: CallId, source: StateStoreError },
    DuplicateCreationId { call_id: CallId, source: DuplicateCreationId },
    TouchedWithoutAccount { call_id: CallId },
    Timeout { call_id: CallId },
}

impl BatchFault {
    fn call_id(&self) -> &CallId {
        match self {
            Self::StateStore { call_id, .. }
            | Self::DuplicateCreationId { call_id, .. }
            | Self::TouchedWithoutAccount { call_id }
            | Self::Timeout { call_id } => call_id,
        }
    }

    /// Whether the faulting call's handler returned before the fault, so its effects may be
    /// visible even though nothing was committed for it.
    fn handler_returned(&self) -> bool {
        !matches!(self, Self::Timeout { .. })
    }

    fn kind(&self) -> RequestErrorType {
        match self {
            Self::Timeout { .. } => RequestErrorType::Timeout,
            _ => RequestErrorType::ServerFail,
        }
    }
}

impl fmt::Display for BatchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateStore { call_id, source } => {
                write!(f, "call {call_id}: state store failure: {source}")
            }
            Self::DuplicateCreationId { call_id, source } => {
                write!(f, "call {call_id}: {source}")
            }
            Self::TouchedWithoutAccount { call_id } => {
                write!(f, "call {call_id}: handler changed state without an account")
            }
            Self::Timeout { call_id } => {
                write!(f, "request deadline expired during call {call_id}")
            }
        }
    }
}

struct Prepared {
    account_id: Option<AccountId>,
    arguments: Arguments,
}

/// Mutable state owned by one batch. Discarded at `Done`.
struct BatchContext {
    registry: Arc<CapabilityRegistry>,
    using: HashSet<String>,
    created_ids: CreatedIds,
    results: Vec<InvocationResult>,
    changes: StateChange,
    addressed: BTreeSet<AccountId>,
    phase: BatchPhase,
}

impl BatchContext {
    fn advance(&mut self, next: BatchPhase) {
        debug_assert!(self.phase.can_advance_to(next), "{:?} -> {next:?}", self.phase);
        trace!(from = ?self.phase, to = ?next, "batch phase");
        self.phase = next;
    }
}

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    registry: SharedRegistry,
    accounts: Arc<AccountDirectory>,
    dispatcher: Arc<MethodDispatcher>,
    state: Arc<StateStore>,
    timeout: Option<Duration>,
}

impl BatchExecutor {
    pub fn new(
        registry: SharedRegistry,
        accounts: Arc<AccountDirectory>,
        dispatcher: Arc<MethodDispatcher>,
        state: Arc<StateStore>,
    ) -> Self {
        Self { registry, accounts, dispatcher, state, timeout: None }
    }

    /// Bounds the wall-clock time of each batch. `None` disables the deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn accounts(&self) -> &AccountDirectory {
        &self.accounts
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub async fn execute(&self, request: Request) -> BatchOutcome {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        self.execute_until(request, deadline).await
    }

    pub async fn execute_until(&self, request: Request, deadline: Option<Instant>) -> BatchOutcome {
        let span = info_span!("batch", calls = request.method_calls.len());
        self.run(request, deadline).instrument(span).await
    }

    async fn run(&self, request: Request, deadline: Option<Instant>) -> BatchOutcome {
        let registry = self.registry.current();

        if let Err(rejection) = admit(&registry, &request) {
            warn!(kind = ?rejection.kind, detail = %rejection.detail, "batch rejected");
            let response = Response {
                method_responses: Vec::new(),
                created_ids: request.created_ids.unwrap_or_default(),
                session_state: topology_state(&registry, &self.accounts),
                errors: Some(vec![rejection]),
            };
            return BatchOutcome { response, changes: None, phase: BatchPhase::Rejected };
        }

        let Request { using, method_calls, created_ids } = request;
        let mut ctx = BatchContext {
            using: using.into_iter().collect(),
            created_ids: CreatedIds::seeded(created_ids.unwrap_or_default()),
            results: Vec::with_capacity(method_calls.len()),
            changes: StateChange::default(),
            addressed: BTreeSet::new(),
            phase: BatchPhase::Admitting,
            registry,
        };

        let mut abort = None;
        let mut pending = method_calls.into_iter().enumerate();
        while let Some((index, invocation)) = pending.next() {
            ctx.advance(BatchPhase::Executing(index));

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let fault = BatchFault::Timeout { call_id: invocation.call_id.clone() };
                let not_attempted = std::iter::once(invocation.call_id)
                    .chain(pending.by_ref().map(|(_, rest)| rest.call_id))
                    .collect();
                abort = Some((fault, not_attempted));
                break;
            }

            match self.step(&mut ctx, invocation, deadline).await {
                Ok(result) => ctx.results.push(result),
                Err(fault) => {
                    let call_id = fault.call_id().clone();
                    let mut not_attempted = Vec::new();
                    if fault.handler_returned() {
                        let error = MethodError::server_fail(fault.to_string());
                        ctx.results.push(InvocationResult::error(error, call_id));
                    } else {
                        not_attempted.push(call_id);
                    }
                    not_attempted.extend(pending.by_ref().map(|(_, rest)| rest.call_id));
                    abort = Some((fault, not_attempted));
                    break;
                }
            }
        }

        ctx.advance(BatchPhase::Assembling);
        let errors = abort.map(|(fault, not_attempted)| {
            match fault {
                BatchFault::Timeout { .. } => warn!(%fault, "batch timed out"),
                _ => error!(%fault, "batch aborted"),
            }
            let error = RequestError::new(fault.kind(), fault.to_string());
            vec![error.with_not_attempted(not_attempted)]
        });

        let topology = topology_state(&ctx.registry, &self.accounts);
        let session_state = batch_state(
            &topology,
            ctx.addressed.iter().map(|account_id| (account_id, self.state.snapshot(account_id))),
        );

        let changes = (!ctx.changes.is_empty()).then(|| std::mem::take(&mut ctx.changes));
        if let Some(changes) = &changes {
            self.state.publish(changes.clone());
        }

        ctx.advance(BatchPhase::Done);
        let response = Response {
            method_responses: ctx.results,
            created_ids: ctx.created_ids.into_map(),
            session_state,
            errors,
        };
        BatchOutcome { response, changes, phase: ctx.phase }
    }

    async fn step(
        &self,
        ctx: &mut BatchContext,
        invocation: Invocation,
        deadline: Option<Instant>,
    ) -> Result<InvocationResult, BatchFault> {
        let Invocation { name, arguments, call_id } = invocation;

        let prepared = match self.prepare(ctx, &name, arguments) {
            Ok(prepared) => prepared,
            Err(error) => {
                debug!(call_id = %call_id, method = %name, error = %error, "call refused");
                return Ok(InvocationResult::error(error, call_id));
            }
        };
        let Prepared { account_id, arguments } = prepared;

        let method_ctx = MethodContext {
            account_id: account_id.as_ref(),
            registry: &ctx.registry,
            state: StateView::new(&self.state),
        };
        let call = self.dispatcher.dispatch(&method_ctx, &name, arguments);
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| BatchFault::Timeout { call_id: call_id.clone() })?,
            None => call.await,
        };

        match outcome {
            MethodOutcome::Error(error) => {
                debug!(call_id = %call_id, method = %name, error = %error, "call failed");
                Ok(InvocationResult::error(error, call_id))
            }
            MethodOutcome::Success(success) => {
                let result = self.commit(ctx, account_id.as_ref(), &call_id, success)?;
                debug!(call_id = %call_id, method = %name, "call succeeded");
                Ok(InvocationResult::Success(Invocation { name, arguments: result, call_id }))
            }
        }
    }

    /// Everything that can refuse a call before its handler runs.
    fn prepare(
        &self,
        ctx: &mut BatchContext,
        name: &str,
        arguments: Arguments,
    ) -> Result<Prepared, MethodError> {
        let handler = self
            .dispatcher
            .handler(name)
            .cloned()
            .ok_or_else(|| MethodError::unknown_method(name))?;
        let capability = handler.capability();
        if !ctx.using.contains(capability) {
            return Err(MethodError::with_description(
                MethodErrorType::UnknownMethod,
                format!("{name} requires {capability} in using"),
            ));
        }

        let arguments = resolve_arguments(arguments, &ctx.results, &ctx.created_ids)?;

        let account_id = if handler.requires_account() {
            let account_id = self.check_account(handler.as_ref(), &arguments)?;
            ctx.addressed.insert(account_id.clone());
            Some(account_id)
        } else {
            None
        };

        check_object_limit(&ctx.registry, handler.object_limit(), &arguments)?;

        if handler.mutates() {
            if let Some(Value::Object(create)) = arguments.get("create") {
                if let Some(taken) = create.keys().find(|key| ctx.created_ids.is_bound(key)) {
                    return Err(MethodError::invalid_arguments(format!(
                        "creation id #{taken} was already used in this request"
                    )));
                }
            }
        }

        Ok(Prepared { account_id, arguments })
    }

    fn check_account(
        &self,
        handler: &dyn MethodHandler,
        arguments: &Arguments,
    ) -> Result<AccountId, MethodError> {
        let raw = match arguments.get("accountId") {
            Some(Value::String(raw)) => raw,
            Some(_) => return Err(MethodError::invalid_arguments("accountId must be a string")),
            None => return Err(MethodError::invalid_arguments("accountId is required")),
        };
        let account_id = AccountId::new(raw.as_str())
            .map_err(|err| MethodError::invalid_arguments(format!("accountId: {err}")))?;

        let Some(account) = self.accounts.get(&account_id) else {
            return Err(MethodError::new(MethodErrorType::AccountNotFound));
        };
        if !account.supports(handler.capability()) {
            return Err(MethodError::new(MethodErrorType::AccountNotSupportedByMethod));
        }
        if handler.mutates() && account.is_read_only {
            return Err(MethodError::new(MethodErrorType::AccountReadOnly));
        }
        Ok(account_id)
    }

    fn commit(
        &self,
        ctx: &mut BatchContext,
        account_id: Option<&AccountId>,
        call_id: &CallId,
        success: MethodSuccess,
    ) -> Result<Arguments, BatchFault> {
        let MethodSuccess { mut arguments, created, touched, new_state_of } = success;

        for (creation_id, server_id) in created {
            ctx.created_ids.bind(creation_id, server_id).map_err(|source| {
                BatchFault::DuplicateCreationId { call_id: call_id.clone(), source }
            })?;
        }

        if touched.is_empty() && new_state_of.is_none() {
            return Ok(arguments);
        }
        let Some(account_id) = account_id else {
            if touched.is_empty() {
                return Ok(arguments);
            }
            return Err(BatchFault::TouchedWithoutAccount { call_id: call_id.clone() });
        };

        let advanced = self
            .state
            .advance_many(account_id, touched.iter())
            .map_err(|source| BatchFault::StateStore { call_id: call_id.clone(), source })?;
        for (data_type, token) in &advanced {
            ctx.changes.record(account_id, data_type.clone(), *token);
        }

        if let Some(data_type) = new_state_of {
            let token = match advanced.get(&data_type) {
                Some(token) => *token,
                None => self.state.current(account_id, &data_type),
            };
            arguments.insert("newState".to_owned(), Value::String(token.to_string()));
        }
        Ok(arguments)
    }
}

/// Request-level checks. Nothing runs unless every check passes.
fn admit(registry: &CapabilityRegistry, request: &Request) -> Result<(), RequestError> {
    if let Some(unknown) = request.using.iter().find(|uri| !registry.supports(uri)) {
        return Err(RequestError::new(
            RequestErrorType::UnknownCapability,
            format!("unsupported capability {unknown}"),
        ));
    }

    let mut seen = HashSet::with_capacity(request.method_calls.len());
    if let Some(dup) = request.method_calls.iter().find(|call| !seen.insert(&call.call_id)) {
        return Err(RequestError::new(
            RequestErrorType::NotRequest,
            format!("duplicate call id {}", dup.call_id),
        ));
    }

    let calls = request.method_calls.len() as u64;
    let max_calls = registry.limit(LimitName::MaxCallsInRequest);
    if !max_calls.admits(calls) {
        return Err(RequestError::limit(
            LimitName::MaxCallsInRequest.as_str(),
            format!("{calls} method calls exceed the limit of {max_calls}"),
        ));
    }

    let max_size = registry.limit(LimitName::MaxSizeRequest);
    if max_size != Limit::Unbounded {
        let size = encoded_size(request);
        if !max_size.admits(size) {
            return Err(RequestError::limit(
                LimitName::MaxSizeRequest.as_str(),
                format!("request of {size} bytes exceeds the limit of {max_size}"),
            ));
        }
    }
    Ok(())
}

/// JSON-encoded size of `request`, without buffering the encoding.
pub fn encoded_size(request: &Request) -> u64 {
    let mut counter = ByteCounter(0);
    // Serializing a parsed request cannot fail; an error would only undercount.
    let _ = serde_json::to_writer(&mut counter, request);
    counter.0
}

struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn check_object_limit(
    registry: &CapabilityRegistry,
    limit: ObjectLimit,
    arguments: &Arguments,
) -> Result<(), MethodError> {
    let (name, count) = match limit {
        ObjectLimit::None => return Ok(()),
        ObjectLimit::Get => (LimitName::MaxObjectsInGet, entry_count(arguments.get("ids"))),
        ObjectLimit::Set => {
            let count = ["create", "update", "destroy"]
                .iter()
                .map(|key| entry_count(arguments.get(*key)))
                .sum();
            (LimitName::MaxObjectsInSet, count)
        }
    };
    let max = registry.limit(name);
    if max.admits(count) {
        Ok(())
    } else {
        Err(MethodError::request_too_large(format!("{count} objects exceed {name} of {max}")))
    }
}

fn entry_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Array(items)) => items.len() as u64,
        Some(Value::Object(entries)) => entries.len() as u64,
        _ => 0,
    }
}
