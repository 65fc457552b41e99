//! Subcommands of the `tenantops` binary.

mod check;
mod list;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Context as _;
pub use check::CheckArgs;
use clap::Subcommand;
pub use list::ListArgs;
use serde::{Deserialize, Serialize};
use tenantops_core::deadline::Deadline;
use tenantops_core::retry::RetryPolicy;
use tenantops_reqwest::ReqwestClient;

/// Shared state handed to every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Authenticated API client.
    pub client: ReqwestClient,
    /// Policy applied to each remote call.
    pub policy: RetryPolicy,
    /// Overall deadline, cancelled on Ctrl-C.
    pub deadline: Deadline,
}

/// Available commands.
#[derive(Debug, Clone, Subcommand, Serialize, Deserialize)]
pub enum Command {
    /// Page through a collection and print one JSON record per line
    List(ListArgs),
    /// Check that every identifier in a file resolves to an existing object
    Check(CheckArgs),
}

impl Command {
    /// Runs the command.
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        match self {
            Self::List(args) => args.execute(ctx).await,
            Self::Check(args) => args.execute(ctx).await,
        }
    }
}

/// Opens `path` for writing, or stdout when no path is given.
fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}
