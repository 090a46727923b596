// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Halimede: batch execution for a JMAP-style mail RPC protocol.
//!
//! A request is an ordered list of method calls. [`batch::BatchExecutor`] admits it against the
//! [`capability::CapabilityRegistry`], runs the calls in order while threading creation ids and
//! result references between them, advances per-account state tokens in the
//! [`store::StateStore`], and assembles one response per call.

pub mod api;
pub mod batch;
pub mod capability;
pub mod config;
pub mod methods;
pub mod model;
pub mod session;
pub mod store;
pub mod telemetry;
