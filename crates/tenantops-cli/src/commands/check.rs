//! `check`: verify that a list of objects exists.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use tenantops_core::ErrorKind;
use tenantops_core::batch::{ActionOutcome, BatchItem, BatchProcessor, BatchProgress, BatchReport};

use super::{Context, open_output};
use crate::TRACING_TARGET_COMMAND;

/// Placeholder replaced by each identifier.
const PLACEHOLDER: &str = "{id}";

/// Arguments of the `check` command.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct CheckArgs {
    /// Object path containing an `{id}` placeholder, e.g. `users/{id}`
    pub template: String,

    /// File with one identifier per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// File to write the JSON report to (stdout by default)
    #[arg(short, long)]
    #[serde(default)]
    pub report: Option<PathBuf>,

    /// Number of checks in flight at once
    #[arg(short, long, default_value_t = 1)]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl CheckArgs {
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.template.contains(PLACEHOLDER),
            "path template '{}' has no {PLACEHOLDER} placeholder",
            self.template
        );

        let input = File::open(&self.input)
            .with_context(|| format!("failed to open {}", self.input.display()))?;
        let ids = read_ids(BufReader::new(input))
            .with_context(|| format!("failed to read {}", self.input.display()))?;

        let report = check_all(ctx, &self.template, ids, self.concurrency).await;

        let mut out = open_output(self.report.as_deref())?;
        serde_json::to_writer_pretty(&mut out, &report).context("failed to write report")?;
        writeln!(out).context("failed to write report")?;
        out.flush().context("failed to write report")?;

        let summary = report.summary();
        tracing::info!(
            target: TRACING_TARGET_COMMAND,
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            outcome = ?summary.outcome(),
            "Check complete"
        );

        if let Some(kind) = report.interrupted {
            anyhow::bail!(
                "check interrupted ({kind}) with {} of {} items attempted",
                summary.succeeded + summary.failed,
                summary.total
            );
        }

        anyhow::ensure!(
            summary.failed == 0,
            "{} of {} checks failed",
            summary.failed,
            summary.total
        );

        Ok(())
    }
}

/// Reads identifiers, one per line, skipping blank lines and `#` comments.
fn read_ids(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut ids = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let id = line.trim();
        if id.is_empty() || id.starts_with('#') {
            continue;
        }
        ids.push(id.to_owned());
    }
    Ok(ids)
}

fn render(template: &str, id: &str) -> String {
    template.replace(PLACEHOLDER, id)
}

/// Checks every identifier and returns the ordered report.
async fn check_all(
    ctx: &Context,
    template: &str,
    ids: Vec<String>,
    concurrency: usize,
) -> BatchReport<String> {
    let mut processor = BatchProcessor::new()
        .with_concurrency(concurrency)
        .with_deadline(ctx.deadline.clone())
        .on_progress(|progress: &BatchProgress<'_, String>| {
            tracing::info!(
                target: TRACING_TARGET_COMMAND,
                completed = progress.completed,
                total = progress.total,
                id = %progress.result.input,
                status = %progress.result.status,
                "Checked"
            );
        });

    processor
        .run(BatchItem::enumerate(ids), |id| check_one(ctx, template, id))
        .await
}

/// Looks up one object under the retry policy.
///
/// A missing object is a skip rather than a failure.
async fn check_one(
    ctx: &Context,
    template: &str,
    id: String,
) -> tenantops_core::Result<ActionOutcome> {
    let path = render(template, &id);
    let lookup = ctx
        .policy
        .retry(&ctx.deadline, || ctx.client.get_json::<IgnoredAny>(&path))
        .await;

    match lookup {
        Ok(_) => Ok(ActionOutcome::success("exists")),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ActionOutcome::skip("not found")),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use tenantops_core::batch::BatchStatus;
    use tenantops_core::deadline::Deadline;
    use tenantops_core::retry::RetryPolicy;
    use tenantops_reqwest::{ReqwestClient, ReqwestConfig};
    use tokio_util::sync::CancellationToken;

    use super::*;

    async fn user(Path(id): Path<String>, State(flaky): State<Arc<AtomicU32>>) -> Response {
        match id.as_str() {
            "ghost" => StatusCode::NOT_FOUND.into_response(),
            "locked" => (
                StatusCode::FORBIDDEN,
                Json(json!({"error": {"code": "Authorization_RequestDenied", "message": "Insufficient privileges"}})),
            )
                .into_response(),
            "flaky" if flaky.fetch_add(1, Ordering::SeqCst) == 0 => {
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
            _ => Json(json!({ "id": id })).into_response(),
        }
    }

    async fn context(deadline: Deadline) -> Context {
        let router = Router::new()
            .route("/users/{id}", get(user))
            .with_state(Arc::new(AtomicU32::new(0)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Context {
            client: ReqwestClient::new(ReqwestConfig::new(base)).unwrap(),
            policy: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(10))
                .unwrap(),
            deadline,
        }
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| (*id).to_owned()).collect()
    }

    #[test]
    fn test_read_ids_skips_blanks_and_comments() {
        let input = "# exported 2024-05-01\nalice\n\n  bob  \n#carol\ndave\n";
        let ids = read_ids(input.as_bytes()).unwrap();
        assert_eq!(ids, vec!["alice", "bob", "dave"]);
    }

    #[test]
    fn test_render_substitutes_every_placeholder() {
        assert_eq!(render("users/{id}", "adele@contoso.com"), "users/adele@contoso.com");
        assert_eq!(render("{id}/x/{id}", "7"), "7/x/7");
    }

    #[tokio::test]
    async fn test_statuses_follow_input_order() {
        let ctx = context(Deadline::none()).await;
        let report = check_all(
            &ctx,
            "users/{id}",
            ids(&["alice", "ghost", "locked", "flaky", "bob"]),
            3,
        )
        .await;

        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                BatchStatus::Success,
                BatchStatus::Skipped,
                BatchStatus::Failed,
                BatchStatus::Success,
                BatchStatus::Success,
            ]
        );
        assert_eq!(report.results[1].detail, "not found");
        assert!(report.results[2].detail.contains("Insufficient privileges"));
        assert_eq!(report.results[3].input, "flaky");
        assert!(report.interrupted.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_check_skips_everything() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = context(Deadline::none().with_cancellation(token)).await;

        let report = check_all(&ctx, "users/{id}", ids(&["alice", "bob"]), 1).await;
        assert_eq!(report.len(), 2);
        assert_eq!(report.summary().skipped, 2);
        assert_eq!(report.interrupted, Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_execute_writes_report_and_fails_on_failures() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ids.txt");
        let report = dir.path().join("report.json");
        std::fs::write(&input, "alice\nlocked\n").unwrap();

        let args = CheckArgs {
            template: "users/{id}".to_owned(),
            input,
            report: Some(report.clone()),
            concurrency: 1,
        };

        let ctx = context(Deadline::none()).await;
        let err = args.execute(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 checks failed");

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(written["results"][0]["status"], "success");
        assert_eq!(written["results"][1]["status"], "failed");
        assert_eq!(written["results"][1]["input"], "locked");
    }

    #[tokio::test]
    async fn test_template_without_placeholder_is_rejected() {
        let args = CheckArgs {
            template: "users".to_owned(),
            input: PathBuf::from("unused.txt"),
            report: None,
            concurrency: 1,
        };

        let ctx = context(Deadline::none()).await;
        assert!(args.execute(&ctx).await.is_err());
    }
}
