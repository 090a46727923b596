// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Batch execution: admission, reference resolution, dispatch and commit.

pub mod created_ids;
pub mod dispatch;
pub mod executor;
pub mod reference;

pub use created_ids::{CreatedIds, DuplicateCreationId};
pub use dispatch::{
    MethodContext, MethodDispatcher, MethodHandler, MethodOutcome, MethodSuccess, ObjectLimit,
    StateView,
};
pub use executor::{encoded_size, BatchExecutor, BatchOutcome, BatchPhase};
pub use reference::{
    evaluate_path, resolve_arguments, resolve_reference, ArgumentError, PathError,
    ReferenceError, ResultReference,
};

#[cfg(test)]
mod tests;
