#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod signal;
mod telemetry;

use std::process;

use anyhow::Context as _;
use tenantops_reqwest::ReqwestClient;
use tokio_util::sync::CancellationToken;

use crate::commands::Context;
use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "tenantops_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "tenantops_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "tenantops_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "tenantops_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = format!("{error:#}"),
            "command failed"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    telemetry::init_tracing()?;
    cli.log();

    let policy = cli.retry.policy().context("invalid retry configuration")?;

    let mut client =
        ReqwestClient::new(cli.http.clone()).context("invalid HTTP configuration")?;
    if let Some(token) = cli.auth.access_token() {
        client = client.with_access_token(token);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(signal::cancel_on_signal(cancel.clone()));

    let ctx = Context {
        client,
        policy,
        deadline: cli.deadline().with_cancellation(cancel),
    };

    cli.command.execute(&ctx).await
}
