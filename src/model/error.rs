// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Error values that travel on the wire.
//!
//! Method-level errors are scoped to a single invocation, request-level errors reject (or
//! abort) a whole batch and are rendered as RFC 7807 problem documents.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::CallId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodErrorType {
    ServerUnavailable,
    ServerFail,
    ServerPartialFail,
    UnknownMethod,
    InvalidArguments,
    InvalidResultReference,
    Forbidden,
    AccountNotFound,
    AccountNotSupportedByMethod,
    AccountReadOnly,
    RequestTooLarge,
    StateMismatch,
    FromAccountNotFound,
    FromAccountNotSupportedByMethod,
    AnchorNotFound,
    UnsupportedSort,
    UnsupportedFilter,
    CannotCalculateChanges,
    TooManyChanges,
}

impl MethodErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerUnavailable => "serverUnavailable",
            Self::ServerFail => "serverFail",
            Self::ServerPartialFail => "serverPartialFail",
            Self::UnknownMethod => "unknownMethod",
            Self::InvalidArguments => "invalidArguments",
            Self::InvalidResultReference => "invalidResultReference",
            Self::Forbidden => "forbidden",
            Self::AccountNotFound => "accountNotFound",
            Self::AccountNotSupportedByMethod => "accountNotSupportedByMethod",
            Self::AccountReadOnly => "accountReadOnly",
            Self::RequestTooLarge => "requestTooLarge",
            Self::StateMismatch => "stateMismatch",
            Self::FromAccountNotFound => "fromAccountNotFound",
            Self::FromAccountNotSupportedByMethod => "fromAccountNotSupportedByMethod",
            Self::AnchorNotFound => "anchorNotFound",
            Self::UnsupportedSort => "unsupportedSort",
            Self::UnsupportedFilter => "unsupportedFilter",
            Self::CannotCalculateChanges => "cannotCalculateChanges",
            Self::TooManyChanges => "tooManyChanges",
        }
    }
}

impl fmt::Display for MethodErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single invocation; rendered as `["error", {...}, callId]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodError {
    #[serde(rename = "type")]
    pub kind: MethodErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MethodError {
    pub fn new(kind: MethodErrorType) -> Self {
        Self { kind, description: None }
    }

    pub fn with_description(kind: MethodErrorType, description: impl Into<String>) -> Self {
        Self { kind, description: Some(description.into()) }
    }

    pub fn unknown_method(name: &str) -> Self {
        Self::with_description(MethodErrorType::UnknownMethod, format!("unknown method {name:?}"))
    }

    pub fn invalid_arguments(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorType::InvalidArguments, description)
    }

    pub fn invalid_result_reference(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorType::InvalidResultReference, description)
    }

    pub fn request_too_large(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorType::RequestTooLarge, description)
    }

    pub fn server_fail(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorType::ServerFail, description)
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for MethodError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetErrorType {
    Forbidden,
    OverQuota,
    TooLarge,
    RateLimit,
    NotFound,
    InvalidPatch,
    WillDestroy,
    InvalidProperties,
    Singleton,
    AlreadyExists,
    MailboxHasChild,
    MailboxHasEmail,
}

/// Per-object failure inside a bulk method (`notCreated`, `notUpdated`, `notCopied`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetError {
    #[serde(rename = "type")]
    pub kind: SetErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
}

impl SetError {
    pub fn new(kind: SetErrorType) -> Self {
        Self { kind, description: None, properties: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    pub fn not_found() -> Self {
        Self::new(SetErrorType::NotFound)
    }

    pub fn invalid_properties<I, S>(properties: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(SetErrorType::InvalidProperties)
            .with_properties(properties)
            .with_description(description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestErrorType {
    #[serde(rename = "urn:ietf:params:jmap:error:unknownCapability")]
    UnknownCapability,
    #[serde(rename = "urn:ietf:params:jmap:error:notJSON")]
    NotJson,
    #[serde(rename = "urn:ietf:params:jmap:error:notRequest")]
    NotRequest,
    #[serde(rename = "urn:ietf:params:jmap:error:limit")]
    Limit,
    #[serde(rename = "urn:ietf:params:jmap:error:serverFail")]
    ServerFail,
    #[serde(rename = "urn:ietf:params:jmap:error:timeout")]
    Timeout,
}

impl RequestErrorType {
    pub fn status(self) -> u16 {
        match self {
            Self::UnknownCapability | Self::NotJson | Self::NotRequest | Self::Limit => 400,
            Self::ServerFail => 500,
            Self::Timeout => 504,
        }
    }
}

/// Request-level failure (RFC 7807 problem details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestError {
    #[serde(rename = "type")]
    pub kind: RequestErrorType,
    pub status: u16,
    pub detail: String,
    /// Name of the exceeded limit for `limit` errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    /// Call ids that were never executed because the batch was aborted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_attempted: Vec<CallId>,
}

impl RequestError {
    pub fn new(kind: RequestErrorType, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.status(),
            detail: detail.into(),
            limit: None,
            not_attempted: Vec::new(),
        }
    }

    pub fn limit(limit: &str, detail: impl Into<String>) -> Self {
        let mut error = Self::new(RequestErrorType::Limit, detail);
        error.limit = Some(limit.to_owned());
        error
    }

    pub fn with_not_attempted(mut self, call_ids: Vec<CallId>) -> Self {
        self.not_attempted = call_ids;
        self
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.status)
    }
}

impl std::error::Error for RequestError {}
