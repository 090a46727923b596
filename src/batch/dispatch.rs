// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::CapabilityRegistry;
use crate::model::{
    AccountId, Arguments, CreationId, DataType, MethodError, ServerId, StateToken, TypeState,
};
use crate::store::StateStore;

/// Which configured per-call object limit applies to a method's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectLimit {
    None,
    /// `ids` is bounded by `maxObjectsInGet`.
    Get,
    /// `create` + `update` + `destroy` is bounded by `maxObjectsInSet`.
    Set,
}

/// Read-only view of the state store handed to handlers.
#[derive(Clone, Copy)]
pub struct StateView<'a> {
    store: &'a StateStore,
}

impl<'a> StateView<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    pub fn current(&self, account_id: &AccountId, data_type: &DataType) -> StateToken {
        self.store.current(account_id, data_type)
    }

    pub fn snapshot(&self, account_id: &AccountId) -> TypeState {
        self.store.snapshot(account_id)
    }
}

/// Everything a handler may look at while serving one invocation.
pub struct MethodContext<'a> {
    pub account_id: Option<&'a AccountId>,
    pub registry: &'a CapabilityRegistry,
    pub state: StateView<'a>,
}

impl MethodContext<'_> {
    /// The validated `accountId` of the invocation.
    pub fn account(&self) -> Result<&AccountId, MethodError> {
        self.account_id.ok_or_else(|| MethodError::invalid_arguments("accountId is required"))
    }
}

/// Successful handler result plus the side effects the executor should commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSuccess {
    pub arguments: Arguments,
    pub created: BTreeMap<CreationId, ServerId>,
    pub touched: BTreeSet<DataType>,
    /// When set, the executor writes the (possibly advanced) token of this type as `newState`.
    pub new_state_of: Option<DataType>,
}

impl MethodSuccess {
    pub fn new(arguments: Arguments) -> Self {
        Self { arguments, ..Self::default() }
    }

    pub fn created(mut self, creation_id: CreationId, server_id: ServerId) -> Self {
        self.created.insert(creation_id, server_id);
        self
    }

    pub fn touched(mut self, data_type: DataType) -> Self {
        self.touched.insert(data_type);
        self
    }

    pub fn with_new_state(mut self, data_type: DataType) -> Self {
        self.new_state_of = Some(data_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    Success(MethodSuccess),
    Error(MethodError),
}

impl From<MethodSuccess> for MethodOutcome {
    fn from(success: MethodSuccess) -> Self {
        Self::Success(success)
    }
}

impl From<MethodError> for MethodOutcome {
    fn from(error: MethodError) -> Self {
        Self::Error(error)
    }
}

impl From<Result<MethodSuccess, MethodError>> for MethodOutcome {
    fn from(result: Result<MethodSuccess, MethodError>) -> Self {
        match result {
            Ok(success) => Self::Success(success),
            Err(error) => Self::Error(error),
        }
    }
}

/// Uniform contract implemented by every method.
///
/// Handlers never mutate the created-id table or the state store; they report created ids and
/// touched types in [`MethodSuccess`] and the executor commits them.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Capability URI that must appear in the request's `using` list.
    fn capability(&self) -> &'static str;

    fn requires_account(&self) -> bool {
        true
    }

    fn mutates(&self) -> bool {
        false
    }

    fn object_limit(&self) -> ObjectLimit {
        ObjectLimit::None
    }

    async fn call(&self, ctx: &MethodContext<'_>, arguments: Arguments) -> MethodOutcome;
}

/// Method name to handler registry.
#[derive(Clone, Default)]
pub struct MethodDispatcher {
    handlers: BTreeMap<String, Arc<dyn MethodHandler>>,
}

impl MethodDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl MethodHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn with(mut self, name: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    pub fn handler(&self, name: &str) -> Option<&Arc<dyn MethodHandler>> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub async fn dispatch(
        &self,
        ctx: &MethodContext<'_>,
        name: &str,
        arguments: Arguments,
    ) -> MethodOutcome {
        match self.handlers.get(name) {
            Some(handler) => handler.call(ctx, arguments).await,
            None => MethodOutcome::Error(MethodError::unknown_method(name)),
        }
    }
}

impl fmt::Debug for MethodDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDispatcher").field("methods", &self.handlers.keys()).finish()
    }
}
