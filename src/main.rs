// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Halimede CLI entrypoint.
//!
//! Serves the session resource and the batch API over HTTP until interrupted.

use std::error::Error;
use std::sync::Arc;

use halimede::api::{self, ApiState};
use halimede::config::{ServerConfig, DEFAULT_LISTEN};
use tracing::{info, warn};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] [--listen <addr>]\n  {program} --demo [--listen <addr>]\n  {program} --config-schema\n\n--config loads a TOML server configuration; without it the server starts with no accounts.\n--demo uses a built-in configuration with one personal and one shared read-only account.\n--listen overrides the configured listen address (default {DEFAULT_LISTEN}).\n--config-schema prints the JSON schema of the configuration file and exits.\n\nRUST_LOG controls log verbosity."
    );
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CliOptions {
    config: Option<String>,
    listen: Option<String>,
    demo: bool,
    config_schema: bool,
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<CliOptions, ()> {
    let mut options = CliOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if options.config.is_some() {
                    return Err(());
                }
                options.config = Some(args.next().ok_or(())?);
            }
            "--listen" => {
                if options.listen.is_some() {
                    return Err(());
                }
                options.listen = Some(args.next().ok_or(())?);
            }
            "--demo" => {
                if options.demo {
                    return Err(());
                }
                options.demo = true;
            }
            "--config-schema" => {
                if options.config_schema {
                    return Err(());
                }
                options.config_schema = true;
            }
            _ => return Err(()),
        }
    }

    if options.demo && options.config.is_some() {
        return Err(());
    }

    let serves = options.demo || options.config.is_some() || options.listen.is_some();
    if options.config_schema && serves {
        return Err(());
    }

    Ok(options)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for ctrl-c; shutting down");
        return;
    }
    info!("shutting down");
}

fn main() {
    let result = (|| -> Result<(), Box<dyn Error>> {
        let mut args = std::env::args();
        let program = args.next().unwrap_or_else(|| "halimede".to_owned());

        let options = match parse_options(args) {
            Ok(options) => options,
            Err(()) => {
                print_usage(&program);
                std::process::exit(2);
            }
        };

        if options.config_schema {
            let schema = schemars::schema_for!(ServerConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }

        halimede::telemetry::init();

        let mut config = match &options.config {
            Some(path) => ServerConfig::load(path)?,
            None if options.demo => ServerConfig::demo(),
            None => {
                warn!("no --config given; serving without accounts");
                ServerConfig::default()
            }
        };
        if let Some(listen) = options.listen {
            config.listen = listen;
            config.validate()?;
        }
        let addr = config.listen_addr()?;
        let state = Arc::new(ApiState::from_config(&config));

        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            let local = listener.local_addr()?;
            info!(addr = %local, accounts = config.accounts.len(), "serving {}", api::API_PATH);

            axum::serve(listener, api::router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            Ok::<(), Box<dyn Error>>(())
        })?;

        Ok(())
    })();

    if let Err(err) = result {
        eprintln!("halimede: {err}");
        std::process::exit(1);
    }
}
