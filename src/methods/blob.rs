// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{into_arguments, parse_arguments, MailStore};
use crate::batch::{MethodContext, MethodHandler, MethodOutcome, MethodSuccess};
use crate::capability::CORE;
use crate::model::{AccountId, Arguments, BlobId, DataType, MethodError, SetError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CopyArguments {
    from_account_id: AccountId,
    account_id: AccountId,
    blob_ids: Vec<BlobId>,
}

/// Partial-success shape: every requested id lands in exactly one of the two maps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CopyResponse {
    from_account_id: AccountId,
    account_id: AccountId,
    copied: Option<BTreeMap<BlobId, BlobId>>,
    not_copied: Option<BTreeMap<BlobId, SetError>>,
}

/// `Blob/copy` between two accounts of the same user.
#[derive(Debug, Clone)]
pub struct BlobCopy {
    store: Arc<MailStore>,
}

impl BlobCopy {
    pub fn new(store: Arc<MailStore>) -> Self {
        Self { store }
    }

    async fn copy(&self, args: CopyArguments) -> Result<MethodSuccess, MethodError> {
        let CopyArguments { from_account_id, account_id, blob_ids } = args;
        let (copied, missing) =
            self.store.copy_blobs(&from_account_id, &account_id, blob_ids).await?;

        let copied: BTreeMap<_, _> = copied.into_iter().map(|id| (id.clone(), id)).collect();
        let not_copied: BTreeMap<_, _> =
            missing.into_iter().map(|id| (id, SetError::not_found())).collect();
        let touched = !copied.is_empty();

        let response = CopyResponse {
            from_account_id,
            account_id,
            copied: (!copied.is_empty()).then_some(copied),
            not_copied: (!not_copied.is_empty()).then_some(not_copied),
        };
        let success = MethodSuccess::new(into_arguments(&response)?);
        Ok(if touched { success.touched(DataType::BLOB) } else { success })
    }
}

#[async_trait]
impl MethodHandler for BlobCopy {
    fn capability(&self) -> &'static str {
        CORE
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn call(&self, _ctx: &MethodContext<'_>, arguments: Arguments) -> MethodOutcome {
        match parse_arguments::<CopyArguments>(arguments) {
            Ok(args) => self.copy(args).await.into(),
            Err(error) => error.into(),
        }
    }
}
