//! Work planning: one queue message per `(source, page)` for a date.
//!
//! Re-planning a date re-enqueues the same logical work; the worker's
//! existence check absorbs it. Any send failure aborts the run.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error, info};

use rawlake_core::WorkUnit;
use rawlake_queue::{encode_work_unit, QueueError, QueueSender};

use crate::error::PlanError;

/// Summary of one planning run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub date: NaiveDate,
    pub planned: usize,
    pub per_source: IndexMap<String, usize>,
}

pub struct Planner {
    sender: Arc<dyn QueueSender>,
    /// Source → queue URL, in planning order.
    queues: IndexMap<String, String>,
    pages: RangeInclusive<u32>,
}

impl Planner {
    /// Plan every source that has a queue.
    pub fn new(
        sender: Arc<dyn QueueSender>,
        queue_urls: IndexMap<String, String>,
        pages: RangeInclusive<u32>,
    ) -> Self {
        Self {
            sender,
            queues: queue_urls,
            pages,
        }
    }

    /// Plan only `sources`, each of which must have a queue.
    pub fn for_sources(
        sender: Arc<dyn QueueSender>,
        queue_urls: &IndexMap<String, String>,
        sources: &[String],
        pages: RangeInclusive<u32>,
    ) -> Result<Self, PlanError> {
        let mut queues = IndexMap::with_capacity(sources.len());
        for source in sources {
            let url = queue_urls
                .get(source)
                .ok_or_else(|| PlanError::MissingQueue(source.clone()))?;
            queues.insert(source.clone(), url.clone());
        }
        Ok(Self::new(sender, queues, pages))
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub async fn plan(&self, date: NaiveDate) -> Result<PlanReport, PlanError> {
        info!(
            date = %date,
            sources = self.queues.len(),
            pages = ?self.pages,
            "Planning ingestion"
        );

        let mut per_source = IndexMap::with_capacity(self.queues.len());
        let mut planned = 0;

        for (source, queue_url) in &self.queues {
            let mut sent = 0;
            for page in self.pages.clone() {
                let unit = WorkUnit::new(source.clone(), date, page)?;
                let body = encode_work_unit(&unit).map_err(|error: QueueError| {
                    error!(source = %source, page, error = %error, "Failed to encode work unit");
                    PlanError::Encode {
                        source_name: source.clone(),
                        page,
                        error,
                    }
                })?;
                let receipt = self.sender.send(queue_url, body).await.map_err(|error| {
                    error!(source = %source, page, error = %error, "Failed to enqueue work unit");
                    PlanError::Send {
                        source_name: source.clone(),
                        page,
                        error,
                    }
                })?;
                debug!(
                    source = %source,
                    page,
                    message_id = %receipt.message_id,
                    md5 = receipt.body_md5.as_deref().unwrap_or("-"),
                    "Enqueued work unit"
                );
                sent += 1;
            }

            info!(source = %source, queue_url = %queue_url, messages = sent, "Planned source");
            per_source.insert(source.clone(), sent);
            planned += sent;
        }

        info!(date = %date, planned, "Planning complete");
        Ok(PlanReport {
            date,
            planned,
            per_source,
        })
    }
}
