//! Record source registry and factory
//!
//! This module provides:
//! - The `RecordSource` trait every fetch backend implements
//! - The fetch error taxonomy shared by all backends
//! - A factory resolving the configured backend
//!
//! Workers interact with sources exclusively through the trait.

pub mod demo;
pub mod http;

use std::sync::Arc;

use thiserror::Error;

use crate::config::{SourceConfig, SourceKind};
use crate::schema::Record;

/// Why a single fetch failed.
///
/// Workers treat every variant the same way (they stop), but the
/// variants are kept apart for logging and the error counters.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a usable response body.
    #[error("transport error: {0}")]
    Transport(String),

    /// The source answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The body arrived but is not a valid record.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Coarse classification used by metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transport,
    Decode,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transport(_) | FetchError::Status { .. } => FetchErrorKind::Transport,
            FetchError::Decode(_) => FetchErrorKind::Decode,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => FetchError::Transport(err.to_string()),
        }
    }
}

/// A backend producing one record per call.
///
/// Each exchange-like backend must:
/// - Perform exactly one request per `fetch`
/// - Decode the payload into a `Record`
/// - Report any failure as a `FetchError` (never panic)
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by every worker of the pool
///
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Canonical backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Fetches and decodes one record on behalf of `worker`.
    async fn fetch(&self, worker: usize) -> Result<Record, FetchError>;
}

/// Builds the backend selected in the configuration.
pub fn get_source(cfg: &SourceConfig) -> anyhow::Result<Arc<dyn RecordSource>> {
    match cfg.kind {
        SourceKind::Http => {
            let source = http::HttpSource::new(cfg)?;
            log::info!("fetching records from {}", source.url());
            Ok(Arc::new(source))
        }
        SourceKind::Demo => Ok(Arc::new(demo::DemoSource::new())),
    }
}
