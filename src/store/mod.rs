// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Shared state that outlives a single batch.
//!
//! The state store hands out per-account, per-type tokens used for incremental sync and change
//! notification.

pub mod state_store;

pub use state_store::{StateStore, StateStoreError};
