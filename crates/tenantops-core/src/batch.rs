//! Failure-isolating batch processing.
//!
//! [`BatchProcessor`] applies an action to every item of an ordered batch and
//! records exactly one [`BatchResult`] per item, in submission order. Errors
//! and panics raised by the action are captured as [`BatchStatus::Failed`]
//! results; they never escape [`BatchProcessor::run`].

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt, stream};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, IntoStaticStr};

use crate::deadline::Deadline;
use crate::{ErrorKind, TRACING_TARGET_BATCH};

/// One unit of work submitted to a [`BatchProcessor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem<T> {
    /// Position in the submitted sequence.
    pub index: usize,
    /// Payload handed to the action.
    pub input: T,
}

impl<T> BatchItem<T> {
    /// Creates an item at `index`.
    pub fn new(index: usize, input: T) -> Self {
        Self { index, input }
    }

    /// Wraps `inputs` as items numbered from zero.
    pub fn enumerate(inputs: impl IntoIterator<Item = T>) -> Vec<Self> {
        inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| Self::new(index, input))
            .collect()
    }
}

/// What an action reports for a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The item was processed; carries an informational note.
    Success(String),
    /// Nothing needed doing; carries the reason (e.g. "already exists").
    Skip(String),
    /// The item could not be processed; carries the error message.
    Fail(String),
}

impl ActionOutcome {
    /// Creates a success outcome.
    pub fn success(detail: impl Into<String>) -> Self {
        Self::Success(detail.into())
    }

    /// Creates a skip outcome.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    /// Creates a failure outcome.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// Terminal state of a processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, StrumDisplay, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The action succeeded.
    Success,
    /// The action decided there was nothing to do, or it never ran.
    Skipped,
    /// The action failed, returned an error, or panicked.
    Failed,
}

/// Outcome recorded for one [`BatchItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult<T> {
    /// Position of the originating item.
    pub index: usize,
    /// Echo of the originating item's payload.
    pub input: T,
    /// Terminal state.
    pub status: BatchStatus,
    /// Error message or informational note.
    pub detail: String,
    /// When the result was recorded.
    pub timestamp: Timestamp,
}

impl<T> BatchResult<T> {
    fn record(item: BatchItem<T>, status: BatchStatus, detail: String) -> Self {
        Self {
            index: item.index,
            input: item.input,
            status,
            detail,
            timestamp: Timestamp::now(),
        }
    }

    /// Returns `true` if the item succeeded.
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    /// Returns `true` if the item failed.
    pub fn is_failed(&self) -> bool {
        self.status == BatchStatus::Failed
    }
}

/// Snapshot handed to the progress callback after each item.
#[derive(Debug)]
pub struct BatchProgress<'a, T> {
    /// Items finished so far, including this one.
    pub completed: usize,
    /// Items in the batch.
    pub total: usize,
    /// Result of the item that just finished.
    pub result: &'a BatchResult<T>,
}

/// Overall shape of a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// No items were submitted.
    Empty,
    /// Every item succeeded or was skipped.
    NoFailures,
    /// Some items failed and some did not.
    PartialFailure,
    /// Every item failed.
    AllFailed,
}

/// Per-status counts of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Items in the batch.
    pub total: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that were skipped.
    pub skipped: usize,
    /// Items that failed.
    pub failed: usize,
}

impl BatchSummary {
    /// Classifies the batch as a whole.
    pub fn outcome(&self) -> BatchOutcome {
        match (self.total, self.failed) {
            (0, _) => BatchOutcome::Empty,
            (_, 0) => BatchOutcome::NoFailures,
            (total, failed) if total == failed => BatchOutcome::AllFailed,
            _ => BatchOutcome::PartialFailure,
        }
    }
}

/// Ordered account of a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport<T> {
    /// One result per submitted item, in submission order.
    pub results: Vec<BatchResult<T>>,
    /// When processing started.
    pub started_at: Timestamp,
    /// When the last result was recorded.
    pub finished_at: Timestamp,
    /// Set when a deadline or cancellation stopped the batch early.
    pub interrupted: Option<ErrorKind>,
}

impl<T> BatchReport<T> {
    /// Counts results per status.
    pub fn summary(&self) -> BatchSummary {
        self.results
            .iter()
            .fold(BatchSummary::default(), |mut summary, result| {
                summary.total += 1;
                match result.status {
                    BatchStatus::Success => summary.succeeded += 1,
                    BatchStatus::Skipped => summary.skipped += 1,
                    BatchStatus::Failed => summary.failed += 1,
                }
                summary
            })
    }

    /// Results that failed.
    pub fn failures(&self) -> impl Iterator<Item = &BatchResult<T>> {
        self.results.iter().filter(|result| result.is_failed())
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

type ProgressFn<'a, T> = Box<dyn FnMut(&BatchProgress<'_, T>) + Send + 'a>;

/// How an item left the submission queue.
enum Attempt<Fut> {
    Started(Fut),
    Panicked(String),
    NotAttempted(String),
}

/// Applies an action to every item of a batch, isolating failures.
///
/// Items run one at a time unless [`with_concurrency`](Self::with_concurrency)
/// allows more; results are always reported in submission order.
pub struct BatchProcessor<'a, T> {
    concurrency: usize,
    deadline: Deadline,
    on_progress: Option<ProgressFn<'a, T>>,
}

impl<T> Default for BatchProcessor<'_, T> {
    fn default() -> Self {
        Self {
            concurrency: 1,
            deadline: Deadline::none(),
            on_progress: None,
        }
    }
}

impl<T> std::fmt::Debug for BatchProcessor<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("concurrency", &self.concurrency)
            .field("deadline", &self.deadline)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl<'a, T> BatchProcessor<'a, T> {
    /// Creates a sequential processor without deadline or progress callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows up to `limit` actions in flight at once.
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Stops starting new items once `deadline` fires.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Invokes `callback` after each item completes.
    #[must_use]
    pub fn on_progress(
        mut self,
        callback: impl FnMut(&BatchProgress<'_, T>) + Send + 'a,
    ) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Runs `action` over `items` and returns one result per item.
    ///
    /// `Err` values, [`ActionOutcome::Fail`] and panics all become
    /// [`BatchStatus::Failed`] for that item alone. Once the deadline fires no
    /// further action starts and the remaining items are recorded as
    /// [`BatchStatus::Skipped`] with a "not attempted" detail.
    pub async fn run<A, Fut, E>(
        &mut self,
        items: impl IntoIterator<Item = BatchItem<T>>,
        mut action: A,
    ) -> BatchReport<T>
    where
        T: Clone,
        A: FnMut(T) -> Fut,
        Fut: Future<Output = Result<ActionOutcome, E>>,
        E: Display,
    {
        let items: Vec<_> = items.into_iter().collect();
        let total = items.len();
        let started_at = Timestamp::now();
        let deadline = self.deadline.clone();
        let mut interruption: Option<(ErrorKind, String)> = None;

        tracing::info!(
            target: TRACING_TARGET_BATCH,
            total,
            concurrency = self.concurrency,
            "Starting batch"
        );

        let results = {
            let pending = stream::iter(items)
                .map(|item| {
                    let attempt = start(&mut action, &item, &deadline, &mut interruption);
                    async move {
                        match attempt {
                            Attempt::Started(fut) => execute(item, fut).await,
                            Attempt::Panicked(message) => {
                                BatchResult::record(item, BatchStatus::Failed, message)
                            }
                            Attempt::NotAttempted(reason) => BatchResult::record(
                                item,
                                BatchStatus::Skipped,
                                format!("not attempted: {reason}"),
                            ),
                        }
                    }
                })
                .buffered(self.concurrency);
            let mut pending = std::pin::pin!(pending);

            let mut results = Vec::with_capacity(total);
            while let Some(result) = pending.next().await {
                log_result(&result);
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(&BatchProgress {
                        completed: results.len() + 1,
                        total,
                        result: &result,
                    });
                }
                results.push(result);
            }
            results
        };

        let report = BatchReport {
            results,
            started_at,
            finished_at: Timestamp::now(),
            interrupted: interruption.map(|(kind, _)| kind),
        };

        let summary = report.summary();
        tracing::info!(
            target: TRACING_TARGET_BATCH,
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            interrupted = ?report.interrupted,
            "Batch finished"
        );

        report
    }
}

/// Starts the action for `item` unless the batch was interrupted.
fn start<T, A, Fut>(
    action: &mut A,
    item: &BatchItem<T>,
    deadline: &Deadline,
    interruption: &mut Option<(ErrorKind, String)>,
) -> Attempt<Fut>
where
    T: Clone,
    A: FnMut(T) -> Fut,
{
    if interruption.is_none()
        && let Err(error) = deadline.check()
    {
        tracing::warn!(
            target: TRACING_TARGET_BATCH,
            index = item.index,
            error = %error,
            "Batch interrupted, remaining items will not be attempted"
        );
        *interruption = Some((error.kind(), error.to_string()));
    }

    if let Some((_, reason)) = interruption {
        return Attempt::NotAttempted(reason.clone());
    }

    let input = item.input.clone();
    match std::panic::catch_unwind(AssertUnwindSafe(|| action(input))) {
        Ok(fut) => Attempt::Started(fut),
        Err(payload) => Attempt::Panicked(panic_detail(payload.as_ref())),
    }
}

/// Awaits one action, converting every way it can fail into a result.
async fn execute<T, Fut, E>(item: BatchItem<T>, action: Fut) -> BatchResult<T>
where
    Fut: Future<Output = Result<ActionOutcome, E>>,
    E: Display,
{
    let (status, detail) = match AssertUnwindSafe(action).catch_unwind().await {
        Ok(Ok(ActionOutcome::Success(detail))) => (BatchStatus::Success, detail),
        Ok(Ok(ActionOutcome::Skip(reason))) => (BatchStatus::Skipped, reason),
        Ok(Ok(ActionOutcome::Fail(message))) => (BatchStatus::Failed, message),
        Ok(Err(error)) => (BatchStatus::Failed, error.to_string()),
        Err(payload) => (BatchStatus::Failed, panic_detail(payload.as_ref())),
    };

    BatchResult::record(item, status, detail)
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");
    format!("action panicked: {message}")
}

fn log_result<T>(result: &BatchResult<T>) {
    match result.status {
        BatchStatus::Failed => tracing::warn!(
            target: TRACING_TARGET_BATCH,
            index = result.index,
            detail = %result.detail,
            "Item failed"
        ),
        status => tracing::debug!(
            target: TRACING_TARGET_BATCH,
            index = result.index,
            status = %status,
            detail = %result.detail,
            "Item processed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::Error;

    async fn always_ok(_: u32) -> Result<ActionOutcome, Error> {
        Ok(ActionOutcome::success("done"))
    }

    #[tokio::test]
    async fn mixed_outcomes_keep_order() {
        let items = BatchItem::enumerate(["a", "b", "c"]);
        let report = BatchProcessor::new()
            .run(items, |input| async move {
                match input {
                    "a" => Ok(ActionOutcome::success("created")),
                    "b" => Err(Error::new(ErrorKind::Conflict).with_message("dup")),
                    _ => Ok(ActionOutcome::skip("already exists")),
                }
            })
            .await;

        let statuses: Vec<_> = report.results.iter().map(|r| (r.input, r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("a", BatchStatus::Success),
                ("b", BatchStatus::Failed),
                ("c", BatchStatus::Skipped),
            ]
        );
        assert!(report.results[1].detail.contains("dup"));
        assert_eq!(report.results[2].detail, "already exists");
        assert_eq!(report.summary().outcome(), BatchOutcome::PartialFailure);
        assert!(report.interrupted.is_none());
    }

    #[tokio::test]
    async fn single_failure_is_isolated() {
        let items = BatchItem::enumerate(0..20u32);
        let report = BatchProcessor::new()
            .run(items, |n| async move {
                if n == 7 {
                    Err(Error::invalid_input().with_message("bad row"))
                } else {
                    Ok(ActionOutcome::success(format!("row {n}")))
                }
            })
            .await;

        assert_eq!(report.len(), 20);
        for (position, result) in report.results.iter().enumerate() {
            assert_eq!(result.index, position);
            assert_eq!(result.input, position as u32);
            assert_eq!(result.is_failed(), position == 7);
        }
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn panicking_action_becomes_failure() {
        let items = BatchItem::enumerate([1u32, 2, 3]);
        let report = BatchProcessor::new()
            .run(items, |n| async move {
                if n == 2 {
                    panic!("mailbox vanished");
                }
                Ok::<_, Error>(ActionOutcome::success("ok"))
            })
            .await;

        assert_eq!(report.summary().failed, 1);
        assert_eq!(report.results[1].status, BatchStatus::Failed);
        assert!(report.results[1].detail.contains("mailbox vanished"));
        assert!(report.results[2].is_success());
    }

    #[tokio::test]
    async fn action_panicking_before_returning_a_future_becomes_failure() {
        let started = &AtomicU32::new(0);
        let items = BatchItem::enumerate([1u32, 2, 3]);

        let report = BatchProcessor::new()
            .run(items, move |n| {
                if n == 2 {
                    panic!("could not build request for {n}");
                }
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(ActionOutcome::success("ok"))
                }
            })
            .await;

        assert_eq!(report.len(), 3);
        assert_eq!(report.results[1].status, BatchStatus::Failed);
        assert!(
            report.results[1]
                .detail
                .contains("action panicked: could not build request for 2")
        );
        assert!(report.results[0].is_success());
        assert!(report.results[2].is_success());
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fail_outcome_is_recorded_as_failed() {
        let report = BatchProcessor::new()
            .run(BatchItem::enumerate(["x"]), |_| async {
                Ok::<_, Error>(ActionOutcome::fail("quota exceeded"))
            })
            .await;

        assert_eq!(report.results[0].status, BatchStatus::Failed);
        assert_eq!(report.results[0].detail, "quota exceeded");
        assert_eq!(report.summary().outcome(), BatchOutcome::AllFailed);
    }

    #[tokio::test]
    async fn empty_batch_is_distinguishable() {
        let report = BatchProcessor::new()
            .run(Vec::<BatchItem<u32>>::new(), always_ok)
            .await;

        assert!(report.is_empty());
        assert_eq!(report.summary(), BatchSummary::default());
        assert_eq!(report.summary().outcome(), BatchOutcome::Empty);
    }

    #[tokio::test]
    async fn progress_reports_every_item() {
        let mut seen = Vec::new();
        {
            let mut processor = BatchProcessor::new()
                .on_progress(|progress| seen.push((progress.completed, progress.total)));
            processor
                .run(BatchItem::enumerate([10u32, 20, 30]), always_ok)
                .await;
        }

        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_results_stay_in_input_order() {
        let started = Instant::now();
        let report = BatchProcessor::new()
            .with_concurrency(3)
            .run(BatchItem::enumerate([3u64, 2, 1]), |secs| async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok::<_, Error>(ActionOutcome::success(format!("slept {secs}s")))
            })
            .await;

        let inputs: Vec<_> = report.results.iter().map(|r| r.input).collect();
        assert_eq!(inputs, vec![3, 2, 1]);
        assert!(report.results.iter().all(BatchResult::is_success));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_skips_remaining_items() {
        let report = BatchProcessor::new()
            .with_deadline(Deadline::after(Duration::from_secs(25)))
            .run(BatchItem::enumerate(0..5u32), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, Error>(ActionOutcome::success("ok"))
            })
            .await;

        assert_eq!(report.len(), 5);
        let summary = report.summary();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.skipped, 2);
        assert!(report.results[3].detail.starts_with("not attempted"));
        assert_eq!(report.interrupted, Some(ErrorKind::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancelled_batch_attempts_nothing() {
        let token = CancellationToken::new();
        token.cancel();

        let mut calls = 0;
        let report = BatchProcessor::new()
            .with_deadline(Deadline::none().with_cancellation(token))
            .run(BatchItem::enumerate(["u1", "u2"]), |_| {
                calls += 1;
                async { Ok::<_, Error>(ActionOutcome::success("ok")) }
            })
            .await;

        assert_eq!(calls, 0);
        assert_eq!(report.summary().skipped, 2);
        assert_eq!(report.interrupted, Some(ErrorKind::Cancelled));
    }

    #[test]
    fn report_serializes_statuses_in_snake_case() {
        let item = BatchItem::new(0, "alice@contoso.com");
        let result = BatchResult::record(item, BatchStatus::Skipped, "already exists".into());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["input"], "alice@contoso.com");
    }
}
