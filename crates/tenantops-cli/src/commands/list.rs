//! `list`: page through a collection.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Context, open_output};
use crate::TRACING_TARGET_COMMAND;

/// Arguments of the `list` command.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ListArgs {
    /// Collection path relative to the API root, e.g. `users`
    pub path: String,

    /// File to write records to (stdout by default)
    #[arg(short, long)]
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl ListArgs {
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let mut out = open_output(self.output.as_deref())?;
        let result = write_records(ctx, &self.path, &mut out).await;
        out.flush().context("failed to flush output")?;

        let written = result?;
        tracing::info!(
            target: TRACING_TARGET_COMMAND,
            path = %self.path,
            records = written,
            "Listing complete"
        );
        Ok(())
    }
}

/// Streams the collection at `path` into `out` as JSON lines.
///
/// Records are written as they arrive, so a failure part-way leaves the
/// earlier records in `out`.
async fn write_records<W: Write + ?Sized>(
    ctx: &Context,
    path: &str,
    out: &mut W,
) -> anyhow::Result<usize> {
    let records = ctx
        .client
        .list::<Value>(path, ctx.policy.clone(), ctx.deadline.clone())
        .into_stream();
    let mut records = std::pin::pin!(records);

    let mut written = 0;
    while let Some(record) = records.next().await {
        let record = record.with_context(|| {
            format!("listing '{path}' failed after {written} records")
        })?;
        serde_json::to_writer(&mut *out, &record).context("failed to write record")?;
        writeln!(out).context("failed to write record")?;
        written += 1;
    }

    Ok(written)
}
