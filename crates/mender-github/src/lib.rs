//! Mender GitHub - Source hosting integration
//!
//! This crate connects the repair pipeline to GitHub:
//! - Client: the `HostingApi` seam and its REST implementation
//! - Retry: rate-limit-only exponential backoff
//! - Branch: sanitised, date-stamped fix branch names
//! - Applier: commits an accepted fix to a new branch
//! - Source: a `SourceFetcher` over the contents API

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod applier;
pub mod branch;
pub mod client;
pub mod error;
pub mod retry;
pub mod source;

pub use applier::{ApplierConfig, ApplyResult, PatchApplier, ValidationRun};
pub use branch::branch_name;
pub use client::{FileUpdate, GitHubClient, GitHubConfig, HostingApi, RemoteFile, WorkflowRun};
pub use error::{Error, Result};
pub use retry::{retry_with_backoff, RetryConfig};
pub use source::HostingSource;
