// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeMap;

use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::error::{MethodError, RequestError};
use super::ids::{CallId, CreationId, ServerId};

/// Method arguments: an arbitrary JSON object.
pub type Arguments = serde_json::Map<String, Value>;

/// Name used in the first slot of an error response.
pub const ERROR_RESPONSE_NAME: &str = "error";

/// One method call; on the wire `[name, arguments, callId]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, Arguments, CallId)")]
pub struct Invocation {
    pub name: String,
    pub arguments: Arguments,
    pub call_id: CallId,
}

impl Invocation {
    pub fn new(name: impl Into<String>, arguments: Arguments, call_id: impl Into<CallId>) -> Self {
        Self { name: name.into(), arguments, call_id: call_id.into() }
    }
}

impl From<(String, Arguments, CallId)> for Invocation {
    fn from((name, arguments, call_id): (String, Arguments, CallId)) -> Self {
        Self { name, arguments, call_id }
    }
}

impl Serialize for Invocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.name)?;
        tuple.serialize_element(&self.arguments)?;
        tuple.serialize_element(&self.call_id)?;
        tuple.end()
    }
}

/// Outcome of one invocation. Exactly one exists per invocation, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationResult {
    Success(Invocation),
    Error { error: MethodError, call_id: CallId },
}

impl InvocationResult {
    pub fn error(error: MethodError, call_id: CallId) -> Self {
        Self::Error { error, call_id }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            Self::Success(invocation) => &invocation.call_id,
            Self::Error { call_id, .. } => call_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Success(invocation) => &invocation.name,
            Self::Error { .. } => ERROR_RESPONSE_NAME,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn as_success(&self) -> Option<&Invocation> {
        match self {
            Self::Success(invocation) => Some(invocation),
            Self::Error { .. } => None,
        }
    }

    pub fn as_error(&self) -> Option<&MethodError> {
        match self {
            Self::Success(_) => None,
            Self::Error { error, .. } => Some(error),
        }
    }
}

impl Serialize for InvocationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(invocation) => invocation.serialize(serializer),
            Self::Error { error, call_id } => {
                let mut tuple = serializer.serialize_tuple(3)?;
                tuple.serialize_element(ERROR_RESPONSE_NAME)?;
                tuple.serialize_element(error)?;
                tuple.serialize_element(call_id)?;
                tuple.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for InvocationResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, arguments, call_id) = <(String, Arguments, CallId)>::deserialize(deserializer)?;
        if name == ERROR_RESPONSE_NAME {
            let error = serde_json::from_value(Value::Object(arguments))
                .map_err(serde::de::Error::custom)?;
            return Ok(Self::Error { error, call_id });
        }
        Ok(Self::Success(Invocation { name, arguments, call_id }))
    }
}

/// A batch of method calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub using: Vec<String>,
    pub method_calls: Vec<Invocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ids: Option<BTreeMap<CreationId, ServerId>>,
}

/// Result of a batch.
///
/// `errors` is only set when the batch was rejected before execution (then
/// `method_responses` is empty) or aborted part-way (then `method_responses` holds what
/// actually ran, and `notAttempted` names every other call).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub method_responses: Vec<InvocationResult>,
    pub created_ids: BTreeMap<CreationId, ServerId>,
    pub session_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<RequestError>>,
}
