// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Wire-level data model.
//!
//! Requests carry ordered invocations; responses carry exactly one result per invocation plus
//! the created-id table and a session state token.

pub mod error;
pub mod ids;
pub mod invocation;
pub mod state;

pub use error::{
    MethodError, MethodErrorType, RequestError, RequestErrorType, SetError, SetErrorType,
};
pub use ids::{AccountId, BlobId, CallId, CreationId, Id, IdError, ServerId};
pub use invocation::{Arguments, Invocation, InvocationResult, Request, Response};
pub use state::{DataType, StateChange, StateToken, TypeState};
