// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::broadcast;

use crate::model::{AccountId, DataType, StateChange, StateToken, TypeState};

const CHANGE_FEED_CAPACITY: usize = 256;

/// One account's ordering domain. Every advance for the account goes through this lock, so two
/// batches mutating the same account never interleave or lose a bump.
#[derive(Debug, Default)]
struct AccountDomain {
    tokens: Mutex<TypeState>,
}

impl AccountDomain {
    fn lock(&self) -> Result<MutexGuard<'_, TypeState>, StateStoreError> {
        self.tokens.lock().map_err(|_| StateStoreError::Poisoned)
    }

    fn read(&self) -> MutexGuard<'_, TypeState> {
        // Tokens are only written after the next value has been computed, so a poisoned guard
        // still holds a consistent map.
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-account, per-type monotonic state tokens.
///
/// Shared by every executing batch. Advances are linearised per account; distinct accounts
/// never contend with each other.
#[derive(Debug)]
pub struct StateStore {
    domains: RwLock<HashMap<AccountId, Arc<AccountDomain>>>,
    changes: broadcast::Sender<StateChange>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { domains: RwLock::new(HashMap::new()), changes }
    }

    fn existing_domain(&self, account_id: &AccountId) -> Option<Arc<AccountDomain>> {
        let domains = self.domains.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        domains.get(account_id).cloned()
    }

    fn domain(&self, account_id: &AccountId) -> Result<Arc<AccountDomain>, StateStoreError> {
        if let Some(domain) = self.existing_domain(account_id) {
            return Ok(domain);
        }
        let mut domains = self.domains.write().map_err(|_| StateStoreError::Poisoned)?;
        Ok(domains.entry(account_id.clone()).or_default().clone())
    }

    /// Current token for (account, type); [`StateToken::INITIAL`] if it never advanced.
    pub fn current(&self, account_id: &AccountId, data_type: &DataType) -> StateToken {
        self.existing_domain(account_id)
            .and_then(|domain| domain.read().get(data_type).copied())
            .unwrap_or(StateToken::INITIAL)
    }

    /// All tracked tokens of one account.
    pub fn snapshot(&self, account_id: &AccountId) -> TypeState {
        self.existing_domain(account_id).map(|domain| domain.read().clone()).unwrap_or_default()
    }

    /// Bumps the token of (account, type) and returns the new value.
    pub fn advance(
        &self,
        account_id: &AccountId,
        data_type: &DataType,
    ) -> Result<StateToken, StateStoreError> {
        let advanced = self.advance_many(account_id, std::iter::once(data_type))?;
        advanced
            .get(data_type)
            .copied()
            .ok_or_else(|| StateStoreError::Exhausted { data_type: data_type.clone() })
    }

    /// Bumps every listed type exactly once under a single acquisition of the account's domain.
    ///
    /// Either all types advance or none do. Duplicate entries advance once.
    pub fn advance_many<'a, I>(
        &self,
        account_id: &AccountId,
        data_types: I,
    ) -> Result<TypeState, StateStoreError>
    where
        I: IntoIterator<Item = &'a DataType>,
    {
        let domain = self.domain(account_id)?;
        let mut tokens = domain.lock()?;

        let mut advanced = TypeState::new();
        for data_type in data_types {
            if advanced.contains_key(data_type) {
                continue;
            }
            let current = tokens.get(data_type).copied().unwrap_or(StateToken::INITIAL);
            let next = current
                .next()
                .ok_or_else(|| StateStoreError::Exhausted { data_type: data_type.clone() })?;
            advanced.insert(data_type.clone(), next);
        }

        for (data_type, token) in &advanced {
            tokens.insert(data_type.clone(), *token);
        }
        drop(tokens);

        tracing::trace!(account_id = %account_id, types = advanced.len(), "state advanced");
        Ok(advanced)
    }

    /// Forces a token, bypassing monotonicity.
    #[cfg(test)]
    pub(crate) fn seed(&self, account_id: &AccountId, data_type: DataType, token: StateToken) {
        if let Ok(domain) = self.domain(account_id) {
            domain.read().insert(data_type, token);
        }
    }

    /// Feed of committed state changes, one message per batch that advanced anything.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub(crate) fn publish(&self, change: StateChange) {
        if change.is_empty() {
            return;
        }
        // No receivers is fine: push delivery is optional.
        let _ = self.changes.send(change);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateStoreError {
    Poisoned,
    Exhausted { data_type: DataType },
}

impl fmt::Display for StateStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poisoned => f.write_str("state store lock poisoned"),
            Self::Exhausted { data_type } => {
                write!(f, "state token space exhausted for type {data_type}")
            }
        }
    }
}

impl std::error::Error for StateStoreError {}

#[cfg(test)]
mod tests;
