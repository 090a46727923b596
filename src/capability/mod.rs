// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Capability registry.
//!
//! The registry is immutable once built. Reconfiguration swaps a whole new registry into a
//! [`SharedRegistry`]; batches that already hold a snapshot keep using it until they finish.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CORE: &str = "urn:ietf:params:jmap:core";
pub const MAIL: &str = "urn:ietf:params:jmap:mail";
pub const SUBMISSION: &str = "urn:ietf:params:jmap:submission";
pub const VACATION_RESPONSE: &str = "urn:ietf:params:jmap:vacationresponse";

/// Server-wide limits advertised under `urn:ietf:params:jmap:core`.
///
/// A value of `0` means the limit is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreCapability {
    pub max_size_upload: u64,
    pub max_concurrent_upload: u64,
    pub max_size_request: u64,
    pub max_concurrent_requests: u64,
    pub max_calls_in_request: u64,
    pub max_objects_in_get: u64,
    pub max_objects_in_set: u64,
    pub collation_algorithms: Vec<String>,
}

impl Default for CoreCapability {
    fn default() -> Self {
        Self {
            max_size_upload: 50_000_000,
            max_concurrent_upload: 4,
            max_size_request: 10_000_000,
            max_concurrent_requests: 4,
            max_calls_in_request: 16,
            max_objects_in_get: 500,
            max_objects_in_set: 500,
            collation_algorithms: vec![
                "i;ascii-casemap".to_owned(),
                "i;unicode-casemap".to_owned(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitName {
    MaxSizeUpload,
    MaxConcurrentUpload,
    MaxSizeRequest,
    MaxConcurrentRequests,
    MaxCallsInRequest,
    MaxObjectsInGet,
    MaxObjectsInSet,
}

impl LimitName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxSizeUpload => "maxSizeUpload",
            Self::MaxConcurrentUpload => "maxConcurrentUpload",
            Self::MaxSizeRequest => "maxSizeRequest",
            Self::MaxConcurrentRequests => "maxConcurrentRequests",
            Self::MaxCallsInRequest => "maxCallsInRequest",
            Self::MaxObjectsInGet => "maxObjectsInGet",
            Self::MaxObjectsInSet => "maxObjectsInSet",
        }
    }
}

impl fmt::Display for LimitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(u64),
    Unbounded,
}

impl Limit {
    fn from_configured(value: u64) -> Self {
        if value == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(value)
        }
    }

    /// Whether `count` stays within the limit.
    pub fn admits(self, count: u64) -> bool {
        match self {
            Self::Bounded(max) => count <= max,
            Self::Unbounded => true,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{max}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRegistry {
    core: CoreCapability,
    descriptors: BTreeMap<String, Value>,
    account_descriptors: BTreeMap<String, Value>,
    epoch: u64,
}

impl CapabilityRegistry {
    pub fn new(core: CoreCapability) -> Self {
        Self { core, descriptors: BTreeMap::new(), account_descriptors: BTreeMap::new(), epoch: 0 }
    }

    /// Registers a non-core capability with its session payload and per-account payload.
    pub fn with_capability(
        mut self,
        uri: impl Into<String>,
        descriptor: Value,
        account_descriptor: Value,
    ) -> Self {
        let uri = uri.into();
        self.account_descriptors.insert(uri.clone(), account_descriptor);
        self.descriptors.insert(uri, descriptor);
        self
    }

    /// Registry advertising core plus mail.
    pub fn with_mail(core: CoreCapability) -> Self {
        Self::new(core).with_capability(
            MAIL,
            Value::Object(Default::default()),
            serde_json::json!({
                "maxMailboxesPerEmail": null,
                "maxMailboxDepth": null,
                "maxSizeMailboxName": 255,
                "maxSizeAttachmentsPerEmail": 50_000_000,
                "emailQuerySortOptions": ["receivedAt"],
                "mayCreateTopLevelMailbox": true
            }),
        )
    }

    pub fn core(&self) -> &CoreCapability {
        &self.core
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn limit(&self, name: LimitName) -> Limit {
        let core = &self.core;
        Limit::from_configured(match name {
            LimitName::MaxSizeUpload => core.max_size_upload,
            LimitName::MaxConcurrentUpload => core.max_concurrent_upload,
            LimitName::MaxSizeRequest => core.max_size_request,
            LimitName::MaxConcurrentRequests => core.max_concurrent_requests,
            LimitName::MaxCallsInRequest => core.max_calls_in_request,
            LimitName::MaxObjectsInGet => core.max_objects_in_get,
            LimitName::MaxObjectsInSet => core.max_objects_in_set,
        })
    }

    pub fn supports(&self, uri: &str) -> bool {
        uri == CORE || self.descriptors.contains_key(uri)
    }

    /// Session-level payload for `uri`.
    pub fn descriptor(&self, uri: &str) -> Option<Value> {
        if uri == CORE {
            return serde_json::to_value(&self.core).ok();
        }
        self.descriptors.get(uri).cloned()
    }

    /// Payload advertised under an account's `accountCapabilities`.
    pub fn account_descriptor(&self, uri: &str) -> Option<Value> {
        if uri == CORE {
            return Some(Value::Object(Default::default()));
        }
        self.account_descriptors.get(uri).cloned()
    }

    /// All capability URIs, core first.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        std::iter::once(CORE).chain(self.descriptors.keys().map(String::as_str))
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::with_mail(CoreCapability::default())
    }
}

/// Reloadable handle around the current registry snapshot.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<CapabilityRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(registry))) }
    }

    pub fn current(&self) -> Arc<CapabilityRegistry> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Installs `registry` as the next configuration epoch.
    pub fn replace(&self, mut registry: CapabilityRegistry) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.epoch = guard.epoch + 1;
        *guard = Arc::new(registry);
        tracing::info!(epoch = guard.epoch(), "capability registry replaced");
    }
}
