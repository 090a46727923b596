// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use async_trait::async_trait;

use crate::batch::{MethodContext, MethodHandler, MethodOutcome, MethodSuccess};
use crate::capability::CORE;
use crate::model::Arguments;

/// `Core/echo`: returns its arguments unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl MethodHandler for Echo {
    fn capability(&self) -> &'static str {
        CORE
    }

    fn requires_account(&self) -> bool {
        false
    }

    async fn call(&self, _ctx: &MethodContext<'_>, arguments: Arguments) -> MethodOutcome {
        MethodSuccess::new(arguments).into()
    }
}
