//! Page retrieval: synthetic generation or remote HTTP with retry.

pub mod backoff;
pub mod remote;
pub mod synthetic;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use rawlake_core::config::FetchConfig;
use rawlake_core::WorkUnit;

use crate::error::FetchError;

pub use backoff::{retry_with_backoff, Attempt, RetryPolicy};
pub use remote::RemoteFetcher;
pub use synthetic::{synthetic_page, SYNTHETIC_ITEM_COUNT};

/// Retrieves the document for a work unit.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, unit: &WorkUnit) -> Result<Value, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Synthetic,
    Remote,
}

/// Default [`PageFetcher`].
///
/// In remote mode a source with no entry in the endpoint map is still served
/// synthetically; a mapped source that exhausts its retries fails.
pub struct Fetcher {
    endpoints: IndexMap<String, String>,
    remote: Option<RemoteFetcher>,
}

impl Fetcher {
    pub fn synthetic() -> Self {
        Self {
            endpoints: IndexMap::new(),
            remote: None,
        }
    }

    pub fn remote(endpoints: IndexMap<String, String>, remote: RemoteFetcher) -> Self {
        Self {
            endpoints,
            remote: Some(remote),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        if config.use_remote_fetch {
            Self::remote(config.endpoint_map.clone(), RemoteFetcher::from_config(config))
        } else {
            Self::synthetic()
        }
    }

    pub fn mode(&self) -> FetchMode {
        if self.remote.is_some() {
            FetchMode::Remote
        } else {
            FetchMode::Synthetic
        }
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch(&self, unit: &WorkUnit) -> Result<Value, FetchError> {
        let Some(remote) = &self.remote else {
            return Ok(synthetic_page(unit, Utc::now()));
        };

        match self.endpoints.get(unit.source()) {
            Some(base_url) => remote.fetch(base_url, unit).await,
            None => {
                debug!(source = unit.source(), "No endpoint mapped, generating synthetic page");
                Ok(synthetic_page(unit, Utc::now()))
            }
        }
    }
}
