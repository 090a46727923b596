// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smol_str::SmolStr;

use super::ids::AccountId;

/// Per-(account, type) version marker.
///
/// Clients only compare tokens for equality; the server relies on the total order to tell a
/// stale token from a current one. On the wire the token is an opaque decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateToken(u64);

impl StateToken {
    pub const INITIAL: Self = Self(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = itoa::Buffer::new();
        f.write_str(buf.format(self.0))
    }
}

impl Serialize for StateToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = itoa::Buffer::new();
        serializer.serialize_str(buf.format(self.0))
    }
}

impl<'de> Deserialize<'de> for StateToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>()
            .map(Self)
            .map_err(|_| serde::de::Error::custom(format!("invalid state token {raw:?}")))
    }
}

/// Name of a resource type whose state is tracked (`Mailbox`, `Email`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataType(SmolStr);

impl DataType {
    pub const CORE: Self = Self(SmolStr::new_static("Core"));
    pub const MAILBOX: Self = Self(SmolStr::new_static("Mailbox"));
    pub const THREAD: Self = Self(SmolStr::new_static("Thread"));
    pub const EMAIL: Self = Self(SmolStr::new_static("Email"));
    pub const EMAIL_DELIVERY: Self = Self(SmolStr::new_static("EmailDelivery"));
    pub const EMAIL_SUBMISSION: Self = Self(SmolStr::new_static("EmailSubmission"));
    pub const IDENTITY: Self = Self(SmolStr::new_static("Identity"));
    pub const VACATION_RESPONSE: Self = Self(SmolStr::new_static("VacationResponse"));
    pub const PUSH_SUBSCRIPTION: Self = Self(SmolStr::new_static("PushSubscription"));
    pub const BLOB: Self = Self(SmolStr::new_static("Blob"));

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the current token of every tracked type in one account.
pub type TypeState = BTreeMap<DataType, StateToken>;

/// Per-account set of types whose state advanced, in the shape push subscribers receive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename = "StateChange")]
pub struct StateChange {
    pub changed: BTreeMap<AccountId, TypeState>,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        self.changed.values().all(BTreeMap::is_empty)
    }

    pub fn record(&mut self, account_id: &AccountId, data_type: DataType, token: StateToken) {
        let types = self.changed.entry(account_id.clone()).or_default();
        let slot = types.entry(data_type).or_insert(token);
        if token > *slot {
            *slot = token;
        }
    }
}
