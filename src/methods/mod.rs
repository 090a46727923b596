// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! In-memory method handlers used by the demo server, tests and benches.
//!
//! Each handler parses its arguments into a typed struct, works on the shared [`MailStore`] and
//! reports created ids and touched types back to the executor through [`MethodSuccess`].
//!
//! [`MethodSuccess`]: crate::batch::MethodSuccess

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::MethodDispatcher;
use crate::model::{AccountId, Arguments, CreationId, MethodError, ServerId, SetError, StateToken};

pub mod blob;
pub mod echo;
pub mod mail;

pub use blob::BlobCopy;
pub use echo::Echo;
pub use mail::{
    Email, EmailGet, EmailQuery, EmailSet, MailStore, Mailbox, MailboxGet, MailboxQuery,
    MailboxSet,
};

/// Registers every bundled handler against `store`.
pub fn register_defaults(dispatcher: &mut MethodDispatcher, store: Arc<MailStore>) {
    dispatcher
        .register("Core/echo", Echo)
        .register("Mailbox/get", MailboxGet::new(store.clone()))
        .register("Mailbox/query", MailboxQuery::new(store.clone()))
        .register("Mailbox/set", MailboxSet::new(store.clone()))
        .register("Email/get", EmailGet::new(store.clone()))
        .register("Email/query", EmailQuery::new(store.clone()))
        .register("Email/set", EmailSet::new(store.clone()))
        .register("Blob/copy", BlobCopy::new(store));
}

pub(crate) fn parse_arguments<T: DeserializeOwned>(arguments: Arguments) -> Result<T, MethodError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|err| MethodError::invalid_arguments(err.to_string()))
}

pub(crate) fn into_arguments<T: Serialize>(response: &T) -> Result<Arguments, MethodError> {
    match serde_json::to_value(response) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(other) => Err(MethodError::server_fail(format!("response is not an object: {other}"))),
        Err(err) => Err(MethodError::server_fail(err.to_string())),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetArguments {
    pub account_id: AccountId,
    #[serde(default)]
    pub ids: Option<Vec<ServerId>>,
    #[serde(default)]
    pub properties: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetResponse {
    pub account_id: AccountId,
    pub state: StateToken,
    pub list: Vec<Value>,
    pub not_found: Vec<ServerId>,
}

/// Keeps `id` plus the requested properties; `None` keeps everything.
pub(crate) fn select_properties(record: Value, properties: Option<&[String]>) -> Value {
    match (record, properties) {
        (Value::Object(mut fields), Some(properties)) => {
            fields.retain(|key, _| key == "id" || properties.iter().any(|wanted| wanted == key));
            Value::Object(fields)
        }
        (record, _) => record,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryArguments {
    pub account_id: AccountId,
    #[serde(default)]
    pub filter: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResponse {
    pub account_id: AccountId,
    pub query_state: StateToken,
    pub can_calculate_changes: bool,
    pub position: u64,
    pub ids: Vec<ServerId>,
    pub total: u64,
}

impl QueryArguments {
    pub fn page(&self, state: StateToken, ids: Vec<ServerId>) -> QueryResponse {
        let total = ids.len() as u64;
        let skip = usize::try_from(self.position).unwrap_or(usize::MAX);
        let take = self.limit.and_then(|limit| usize::try_from(limit).ok()).unwrap_or(usize::MAX);
        QueryResponse {
            account_id: self.account_id.clone(),
            query_state: state,
            can_calculate_changes: false,
            position: self.position.min(total),
            ids: ids.into_iter().skip(skip).take(take).collect(),
            total,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetArguments {
    pub account_id: AccountId,
    #[serde(default)]
    pub if_in_state: Option<StateToken>,
    #[serde(default)]
    pub create: BTreeMap<CreationId, Value>,
    #[serde(default)]
    pub update: BTreeMap<ServerId, Value>,
    #[serde(default)]
    pub destroy: Vec<ServerId>,
}

impl SetArguments {
    pub fn check_state(&self, current: StateToken) -> Result<(), MethodError> {
        match self.if_in_state {
            Some(expected) if expected != current => Err(MethodError::with_description(
                crate::model::MethodErrorType::StateMismatch,
                format!("ifInState {expected} does not match {current}"),
            )),
            _ => Ok(()),
        }
    }
}

/// `/set` response body; `newState` is stamped by the executor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetResponse {
    pub account_id: AccountId,
    pub old_state: StateToken,
    #[serde(serialize_with = "empty_as_null")]
    pub created: BTreeMap<CreationId, Value>,
    #[serde(serialize_with = "empty_as_null")]
    pub updated: BTreeMap<ServerId, Value>,
    #[serde(serialize_with = "empty_vec_as_null")]
    pub destroyed: Vec<ServerId>,
    #[serde(serialize_with = "empty_as_null")]
    pub not_created: BTreeMap<CreationId, SetError>,
    #[serde(serialize_with = "empty_as_null")]
    pub not_updated: BTreeMap<ServerId, SetError>,
    #[serde(serialize_with = "empty_as_null")]
    pub not_destroyed: BTreeMap<ServerId, SetError>,
}

impl SetResponse {
    pub fn new(account_id: AccountId, old_state: StateToken) -> Self {
        Self {
            account_id,
            old_state,
            created: BTreeMap::new(),
            updated: BTreeMap::new(),
            destroyed: Vec::new(),
            not_created: BTreeMap::new(),
            not_updated: BTreeMap::new(),
            not_destroyed: BTreeMap::new(),
        }
    }

    pub fn changed_anything(&self) -> bool {
        !(self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty())
    }
}

fn empty_as_null<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Serialize,
    V: Serialize,
    S: serde::Serializer,
{
    if map.is_empty() {
        serializer.serialize_none()
    } else {
        map.serialize(serializer)
    }
}

fn empty_vec_as_null<T, S>(items: &[T], serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: serde::Serializer,
{
    if items.is_empty() {
        serializer.serialize_none()
    } else {
        items.serialize(serializer)
    }
}
