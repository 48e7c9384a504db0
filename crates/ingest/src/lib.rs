pub mod consumer;
pub mod error;
pub mod fetch;
pub mod planner;
pub mod worker;

pub use consumer::{run_consumer, ConsumerSettings, ConsumerStats};
pub use error::{FetchError, IngestError, PlanError};
pub use fetch::{FetchMode, Fetcher, PageFetcher, RemoteFetcher, RetryPolicy};
pub use planner::{PlanReport, Planner};
pub use worker::{BatchReport, ItemFailure, MessageOutcome, Worker, WorkerOptions};
