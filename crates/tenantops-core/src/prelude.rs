//! Convenient re-exports for common use.

pub use crate::batch::{
    ActionOutcome, BatchItem, BatchOutcome, BatchProcessor, BatchProgress, BatchReport,
    BatchResult, BatchStatus, BatchSummary,
};
pub use crate::deadline::Deadline;
pub use crate::error::{BoxedError, Error, ErrorKind, Result};
pub use crate::fetch::{Continuation, FetchPage, PageSource, PagedFetcher, page_fn};
pub use crate::retry::{RetryClassifier, RetryPolicy, RetryPolicyBuilder, RetryState};
