// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "halimede=debug,info"
    } else {
        "info"
    }
}

/// Installs the global `fmt` subscriber. `RUST_LOG` overrides [`default_filter`].
///
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));
    // Logs go to stderr so stdout stays free for `--config-schema`.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
