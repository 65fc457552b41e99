//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── http: ReqwestConfig   # API root, timeout, user agent, page size
//! ├── auth: AuthConfig      # Bearer token
//! ├── retry: RetryConfig    # Attempts and backoff delays
//! ├── deadline_secs         # Optional overall deadline
//! └── command: Command      # list | check
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.

mod auth;
mod retry;

use std::process;
use std::time::Duration;

pub use auth::AuthConfig;
use clap::Parser;
pub use retry::RetryConfig;
use serde::{Deserialize, Serialize};
use tenantops_core::deadline::Deadline;
use tenantops_reqwest::ReqwestConfig;

use crate::commands::Command;
use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "tenantops")]
#[command(about = "Paged listing and batch checks against Microsoft 365 tenants")]
#[command(version)]
pub struct Cli {
    /// HTTP client configuration.
    #[clap(flatten)]
    pub http: ReqwestConfig,

    /// Credentials sent with every request.
    #[clap(flatten)]
    pub auth: AuthConfig,

    /// Retry and backoff configuration.
    #[clap(flatten)]
    pub retry: RetryConfig,

    /// Overall deadline for the command in seconds
    #[arg(long, env = "TENANTOPS_DEADLINE_SECS", global = true)]
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded before clap parses arguments so that its
    /// values act as environment defaults.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Returns the overall deadline, unbounded when none was given.
    pub fn deadline(&self) -> Deadline {
        match self.deadline_secs {
            Some(secs) => Deadline::after(Duration::from_secs(secs)),
            None => Deadline::none(),
        }
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            api_base_url = %self.http.api_base_url,
            http_timeout_secs = self.http.http_timeout,
            page_size = ?self.http.page_size,
            authenticated = self.auth.access_token.is_some(),
            deadline_secs = ?self.deadline_secs,
            "HTTP configuration"
        );

        self.retry.log();
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}
