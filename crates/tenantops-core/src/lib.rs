#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for paginated retrieval.
pub const TRACING_TARGET_FETCH: &str = "tenantops_core::fetch";

/// Tracing target for batch processing.
pub const TRACING_TARGET_BATCH: &str = "tenantops_core::batch";

/// Tracing target for retry decisions.
pub const TRACING_TARGET_RETRY: &str = "tenantops_core::retry";

mod error;

pub mod batch;
pub mod deadline;
pub mod fetch;
pub mod retry;

#[doc(hidden)]
pub mod prelude;

pub use error::{BoxedError, Error, ErrorKind, Result};
