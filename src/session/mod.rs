// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Session discovery resource and the account directory it describes.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::capability::{CapabilityRegistry, CORE};
use crate::model::{AccountId, TypeState};

/// Digest bytes kept for opaque state strings.
const STATE_DIGEST_LEN: usize = 16;

/// One account as configured on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccountEntry {
    #[schemars(with = "String")]
    pub id: AccountId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_personal: bool,
    #[serde(default)]
    pub is_read_only: bool,
    /// Capability URIs usable with this account.
    pub capabilities: BTreeSet<String>,
    /// Capabilities for which this account is the default.
    #[serde(default)]
    pub primary_for: BTreeSet<String>,
}

fn default_true() -> bool {
    true
}

impl AccountEntry {
    pub fn new(id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_personal: true,
            is_read_only: false,
            capabilities: BTreeSet::new(),
            primary_for: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, uri: impl Into<String>) -> Self {
        self.capabilities.insert(uri.into());
        self
    }

    pub fn primary_for(mut self, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        self.capabilities.insert(uri.clone());
        self.primary_for.insert(uri);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    pub fn shared(mut self) -> Self {
        self.is_personal = false;
        self
    }

    /// Core is usable with every account whether listed or not.
    pub fn supports(&self, uri: &str) -> bool {
        uri == CORE || self.capabilities.contains(uri)
    }
}

/// Ordered set of accounts visible to the authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountDirectory {
    accounts: Vec<AccountEntry>,
}

impl AccountDirectory {
    pub fn new(accounts: Vec<AccountEntry>) -> Self {
        let mut directory = Self::default();
        for account in accounts {
            directory.insert(account);
        }
        directory
    }

    /// Adds or replaces the account with the same id, keeping directory order.
    pub fn insert(&mut self, account: AccountEntry) {
        match self.accounts.iter_mut().find(|existing| existing.id == account.id) {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    pub fn get(&self, account_id: &AccountId) -> Option<&AccountEntry> {
        self.accounts.iter().find(|account| &account.id == account_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountEntry> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Default account for `uri`: the first flagged primary, else the first supporting it.
    pub fn primary(&self, uri: &str) -> Option<&AccountEntry> {
        self.accounts
            .iter()
            .find(|account| account.primary_for.contains(uri))
            .or_else(|| self.accounts.iter().find(|account| account.supports(uri)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionUrls {
    pub api_url: String,
    pub download_url: String,
    pub upload_url: String,
    pub event_source_url: String,
}

impl Default for SessionUrls {
    fn default() -> Self {
        Self {
            api_url: "/jmap/api".to_owned(),
            download_url: "/jmap/download/{accountId}/{blobId}/{name}?type={type}".to_owned(),
            upload_url: "/jmap/upload/{accountId}".to_owned(),
            event_source_url: "/jmap/eventsource?types={types}&closeafter={closeafter}&ping={ping}"
                .to_owned(),
        }
    }
}

/// Account as presented in the session resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub is_personal: bool,
    pub is_read_only: bool,
    pub account_capabilities: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResource {
    pub capabilities: BTreeMap<String, Value>,
    pub accounts: BTreeMap<AccountId, Account>,
    pub primary_accounts: BTreeMap<String, AccountId>,
    pub username: String,
    pub api_url: String,
    pub download_url: String,
    pub upload_url: String,
    pub event_source_url: String,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct SessionAssembler {
    urls: SessionUrls,
}

impl SessionAssembler {
    pub fn new(urls: SessionUrls) -> Self {
        Self { urls }
    }

    pub fn assemble(
        &self,
        registry: &CapabilityRegistry,
        directory: &AccountDirectory,
        username: &str,
    ) -> SessionResource {
        let capabilities = registry
            .uris()
            .filter_map(|uri| registry.descriptor(uri).map(|payload| (uri.to_owned(), payload)))
            .collect();

        let accounts = directory
            .iter()
            .map(|entry| {
                let account_capabilities = entry
                    .capabilities
                    .iter()
                    .filter(|uri| registry.supports(uri))
                    .filter_map(|uri| {
                        registry.account_descriptor(uri).map(|payload| (uri.clone(), payload))
                    })
                    .collect();
                let account = Account {
                    name: entry.name.clone(),
                    is_personal: entry.is_personal,
                    is_read_only: entry.is_read_only,
                    account_capabilities,
                };
                (entry.id.clone(), account)
            })
            .collect();

        let primary_accounts = registry
            .uris()
            .filter_map(|uri| {
                directory.primary(uri).map(|entry| (uri.to_owned(), entry.id.clone()))
            })
            .collect();

        SessionResource {
            capabilities,
            accounts,
            primary_accounts,
            username: username.to_owned(),
            api_url: self.urls.api_url.clone(),
            download_url: self.urls.download_url.clone(),
            upload_url: self.urls.upload_url.clone(),
            event_source_url: self.urls.event_source_url.clone(),
            state: topology_state(registry, directory),
        }
    }
}

/// Opaque digest of the capability and account topology.
///
/// Independent of per-type state tokens.
pub fn topology_state(registry: &CapabilityRegistry, directory: &AccountDirectory) -> String {
    let mut hasher = Sha256::new();
    hasher.update(registry.epoch().to_be_bytes());
    for uri in registry.uris() {
        hasher.update(uri.as_bytes());
        if let Some(payload) = registry.descriptor(uri) {
            hasher.update(payload.to_string().as_bytes());
        }
        hasher.update([0]);
    }
    for account in directory.iter() {
        hasher.update(account.id.as_str().as_bytes());
        hasher.update(account.name.as_bytes());
        hasher.update([u8::from(account.is_personal), u8::from(account.is_read_only)]);
        for uri in &account.capabilities {
            hasher.update(uri.as_bytes());
            hasher.update([u8::from(account.primary_for.contains(uri))]);
        }
        hasher.update([0]);
    }
    encode_digest(hasher)
}

/// Response-level session state: topology plus the tokens of every addressed account.
pub fn batch_state<'a, I>(topology: &str, accounts: I) -> String
where
    I: IntoIterator<Item = (&'a AccountId, TypeState)>,
{
    let mut hasher = Sha256::new();
    hasher.update(topology.as_bytes());
    for (account_id, tokens) in accounts {
        hasher.update([0]);
        hasher.update(account_id.as_str().as_bytes());
        for (data_type, token) in &tokens {
            hasher.update(data_type.as_str().as_bytes());
            hasher.update(token.value().to_be_bytes());
        }
    }
    encode_digest(hasher)
}

fn encode_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(&digest[..STATE_DIGEST_LEN])
}
