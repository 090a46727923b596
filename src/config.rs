// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Server configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is a valid (if
//! account-less) configuration. [`ServerConfig::demo`] is the built-in setup behind `--demo`.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::{CapabilityRegistry, CoreCapability, CORE, MAIL};
use crate::model::AccountId;
use crate::session::{AccountDirectory, AccountEntry, SessionUrls};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub listen: String,
    /// Prefix for the URLs advertised in the session resource. Empty keeps them relative.
    pub base_url: String,
    pub username: String,
    /// Wall-clock budget per batch in milliseconds. `0` disables the deadline.
    pub request_timeout_ms: u64,
    pub core: CoreCapability,
    pub accounts: Vec<AccountEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_owned(),
            base_url: format!("http://{DEFAULT_LISTEN}"),
            username: String::new(),
            request_timeout_ms: 30_000,
            core: CoreCapability::default(),
            accounts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = Self::parse(&content).map_err(|error| error.with_path(path))?;
        debug!(accounts = config.accounts.len(), "configuration loaded");
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// One personal mail account plus a shared read-only one.
    pub fn demo() -> Self {
        let username = "demo@example.com";
        let personal = AccountEntry::new(demo_account("A1"), username)
            .with_capability(CORE)
            .with_capability(MAIL)
            .primary_for(MAIL);
        let shared = AccountEntry::new(demo_account("S1"), "shared@example.com")
            .with_capability(CORE)
            .with_capability(MAIL)
            .read_only()
            .shared();

        Self { username: username.to_owned(), accounts: vec![personal, shared], ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        let registry = self.registry();
        let mut seen = BTreeSet::new();
        for account in &self.accounts {
            if !seen.insert(&account.id) {
                return Err(ConfigError::Invalid(format!(
                    "account `{}` is configured twice",
                    account.id
                )));
            }
            let unknown = account
                .capabilities
                .iter()
                .chain(&account.primary_for)
                .find(|uri| !registry.supports(uri));
            if let Some(uri) = unknown {
                return Err(ConfigError::Invalid(format!(
                    "account `{}` names unknown capability `{uri}`",
                    account.id
                )));
            }
            if let Some(uri) = account.primary_for.difference(&account.capabilities).next() {
                return Err(ConfigError::Invalid(format!(
                    "account `{}` is primary for `{uri}` but does not support it",
                    account.id
                )));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|_| {
            ConfigError::Invalid(format!("`listen` is not a socket address: {}", self.listen))
        })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn registry(&self) -> CapabilityRegistry {
        CapabilityRegistry::with_mail(self.core.clone())
    }

    pub fn directory(&self) -> AccountDirectory {
        AccountDirectory::new(self.accounts.clone())
    }

    /// Session URLs with `base_url` prefixed to the default paths.
    pub fn session_urls(&self) -> SessionUrls {
        let base = self.base_url.trim_end_matches('/');
        let defaults = SessionUrls::default();
        SessionUrls {
            api_url: format!("{base}{}", defaults.api_url),
            download_url: format!("{base}{}", defaults.download_url),
            upload_url: format!("{base}{}", defaults.upload_url),
            event_source_url: format!("{base}{}", defaults.event_source_url),
        }
    }

    /// Accounts that can hold mail.
    pub fn mail_accounts(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.accounts.iter().filter(|account| account.supports(MAIL)).map(|a| a.id.clone())
    }
}

fn demo_account(id: &str) -> AccountId {
    match AccountId::new(id) {
        Ok(id) => id,
        Err(_) => unreachable!("demo account ids are valid"),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: Option<PathBuf>, source: toml::de::Error },
    Invalid(String),
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        match self {
            Self::Parse { source, .. } => Self::Parse { path: Some(path.to_path_buf()), source },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            Self::Parse { path: Some(path), source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            Self::Parse { path: None, source } => write!(f, "failed to parse config: {source}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}
