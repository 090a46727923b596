// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{CreationId, ServerId};

/// Batch-scoped map from client creation id to server-assigned id.
///
/// Append-only: a creation id is bound at most once and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedIds {
    ids: BTreeMap<CreationId, ServerId>,
}

impl CreatedIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated from the request's `createdIds`.
    pub fn seeded(ids: BTreeMap<CreationId, ServerId>) -> Self {
        Self { ids }
    }

    pub fn resolve(&self, creation_id: &str) -> Option<&ServerId> {
        self.ids.get(creation_id)
    }

    pub fn is_bound(&self, creation_id: &str) -> bool {
        self.ids.contains_key(creation_id)
    }

    pub fn bind(
        &mut self,
        creation_id: CreationId,
        server_id: ServerId,
    ) -> Result<(), DuplicateCreationId> {
        if let Some(existing) = self.ids.get(&creation_id) {
            return Err(DuplicateCreationId {
                creation_id,
                existing: existing.clone(),
                attempted: server_id,
            });
        }
        self.ids.insert(creation_id, server_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CreationId, &ServerId)> {
        self.ids.iter()
    }

    pub fn into_map(self) -> BTreeMap<CreationId, ServerId> {
        self.ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCreationId {
    pub creation_id: CreationId,
    pub existing: ServerId,
    pub attempted: ServerId,
}

impl fmt::Display for DuplicateCreationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "creation id #{} already bound to {} (attempted {})",
            self.creation_id, self.existing, self.attempted
        )
    }
}

impl std::error::Error for DuplicateCreationId {}
