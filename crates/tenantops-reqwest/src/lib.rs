#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod client;
mod collection;
mod config;
mod error;

pub use crate::client::{AccessToken, ReqwestClient};
pub use crate::collection::{ODataCollection, ODataPage};
pub use crate::config::ReqwestConfig;
pub use crate::error::{Error, Result, classify_status};

/// Tracing target for reqwest client operations.
pub const TRACING_TARGET: &str = "tenantops_reqwest::client";
