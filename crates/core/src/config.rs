use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

/// Parse a JSON object of string values, keeping the order keys appear in.
pub fn parse_string_map(key: &str, raw: &str) -> Result<IndexMap<String, String>, CoreError> {
    if raw.trim().is_empty() {
        return Ok(IndexMap::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| CoreError::Config(format!("{key} must be a JSON object of strings: {e}")))
}

fn profiled_env_map(profile: &str, key: &str) -> Result<IndexMap<String, String>, CoreError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => parse_string_map(key, &raw),
        None => Ok(IndexMap::new()),
    }
}

fn profiled_env_parsed<T>(profile: &str, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr<Err = CoreError>,
{
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.parse(),
        None => Ok(default),
    }
}

/// Sources planned when nothing else is configured.
pub const DEFAULT_SOURCES: &[&str] = &["api-a", "api-b", "api-c", "api-d"];

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub aws: AwsConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub fetch: FetchConfig,
    pub worker: WorkerConfig,
    pub planner: PlannerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RAWLAKE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, CoreError> {
        let profile = env_or("RAWLAKE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, CoreError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let queue = QueueConfig::from_env_profiled(p)?;
        let planner = PlannerConfig::from_env_profiled(p, &queue)?;
        Ok(Self {
            profile: p.to_string(),
            aws: AwsConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p)?,
            queue,
            fetch: FetchConfig::from_env_profiled(p)?,
            worker: WorkerConfig::from_env_profiled(p)?,
            planner,
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  aws:      region={}, credentials={}", self.aws.region, self.aws.has_static_credentials());
        tracing::info!(
            "  storage:  bucket={}, prefix={}, data_dir={}, write_mode={}",
            self.storage.bucket.as_deref().unwrap_or("(local)"),
            self.storage.prefix.as_deref().unwrap_or(""),
            self.storage.data_dir.display(),
            self.storage.write_mode
        );
        tracing::info!(
            "  queue:    queues={}, batch_size={}, window_ms={}, visibility={}s, max_receive={}",
            self.queue.queue_urls.len(),
            self.queue.batch_size,
            self.queue.batch_window_ms,
            self.queue.visibility_timeout_secs,
            self.queue.max_receive_count
        );
        tracing::info!(
            "  fetch:    remote={}, endpoints={}, max_retries={}, initial_backoff_ms={}",
            self.fetch.use_remote_fetch,
            self.fetch.endpoint_map.len(),
            self.fetch.max_retries,
            self.fetch.initial_backoff_ms
        );
        tracing::info!(
            "  worker:   qps_sleep_ms={}, failure_mode={}",
            self.worker.qps_sleep_ms,
            self.worker.failure_mode
        );
        tracing::info!(
            "  planner:  sources={}, pages={}..={}",
            self.planner.sources.join(","),
            self.planner.first_page,
            self.planner.last_page
        );
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Object storage endpoint override (S3-compatible stores).
    pub endpoint_url: Option<String>,
    /// Queue endpoint override. Kept separate from `endpoint_url` so an S3
    /// override never reroutes SQS traffic.
    pub queue_endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
            queue_endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

// ── Storage ───────────────────────────────────────────────────

/// How `put` treats a key that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Unconditional write; a concurrent duplicate simply overwrites.
    #[default]
    Overwrite,
    /// Conditional create; a second writer observes the existing object.
    CreateIfAbsent,
}

impl FromStr for WriteMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "create_if_absent" | "create-if-absent" => Ok(Self::CreateIfAbsent),
            other => Err(CoreError::Config(format!("unknown STORAGE_WRITE_MODE '{other}'"))),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Overwrite => write!(f, "overwrite"),
            WriteMode::CreateIfAbsent => write!(f, "create_if_absent"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data lake bucket. `None` selects the local filesystem backend.
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub data_dir: PathBuf,
    pub write_mode: WriteMode,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            bucket: profiled_env_opt(p, "DATA_LAKE_BUCKET"),
            prefix: profiled_env_opt(p, "DATA_LAKE_PREFIX"),
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            write_mode: profiled_env_parsed(p, "STORAGE_WRITE_MODE", WriteMode::default())?,
        })
    }

    pub fn is_remote(&self) -> bool {
        self.bucket.is_some()
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Source name → queue URL, in configuration order.
    pub queue_urls: IndexMap<String, String>,
    /// Source name → dead-letter queue URL, used for depth reporting only.
    pub dlq_urls: IndexMap<String, String>,
    /// Messages handed to the worker per batch.
    pub batch_size: usize,
    /// Longest a partial batch waits for more messages.
    pub batch_window_ms: u64,
    pub visibility_timeout_secs: u32,
    /// Receives after which the queue redrives a message to its dead-letter sink.
    pub max_receive_count: u32,
    pub poll_interval_ms: u64,
    /// Long-poll wait per receive call.
    pub wait_time_secs: u32,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            queue_urls: profiled_env_map(p, "QUEUE_URLS_JSON")?,
            dlq_urls: profiled_env_map(p, "DLQ_URLS_JSON")?,
            batch_size: profiled_env_u32(p, "QUEUE_BATCH_SIZE", 2).max(1) as usize,
            batch_window_ms: profiled_env_u64(p, "QUEUE_BATCH_WINDOW_MS", 2000),
            visibility_timeout_secs: profiled_env_u32(p, "QUEUE_VISIBILITY_TIMEOUT_SECS", 180),
            max_receive_count: profiled_env_u32(p, "QUEUE_MAX_RECEIVE_COUNT", 5),
            poll_interval_ms: profiled_env_u64(p, "QUEUE_POLL_INTERVAL_MS", 250),
            wait_time_secs: profiled_env_u32(p, "QUEUE_WAIT_TIME_SECS", 20).min(20),
        })
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Fetch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Fetch from `endpoint_map` instead of generating synthetic pages.
    pub use_remote_fetch: bool,
    /// Source name → base URL. Unmapped sources are always synthetic.
    pub endpoint_map: IndexMap<String, String>,
    /// Total attempts per remote fetch, including the first.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl FetchConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            use_remote_fetch: profiled_env_bool(p, "USE_REAL_HTTP", false),
            endpoint_map: profiled_env_map(p, "ENDPOINT_MAP")?,
            max_retries: profiled_env_u32(p, "MAX_RETRIES", 5).max(1),
            initial_backoff_ms: profiled_env_u64(p, "INITIAL_BACKOFF_MS", 500),
            timeout_secs: profiled_env_u64(p, "HTTP_TIMEOUT_SECS", 20),
            user_agent: profiled_env_or(p, "HTTP_USER_AGENT", "rawlake-ingest"),
        })
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Worker ────────────────────────────────────────────────────

/// What a failed message does to the rest of its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailureMode {
    /// Stop at the first failure and acknowledge nothing; the whole batch
    /// is redelivered.
    #[default]
    AbortBatch,
    /// Attempt every message and leave only the failures unacknowledged.
    ReportItemFailures,
}

impl FromStr for BatchFailureMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort_batch" | "abort-batch" => Ok(Self::AbortBatch),
            "report_item_failures" | "report-item-failures" => Ok(Self::ReportItemFailures),
            other => Err(CoreError::Config(format!("unknown BATCH_FAILURE_MODE '{other}'"))),
        }
    }
}

impl fmt::Display for BatchFailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchFailureMode::AbortBatch => write!(f, "abort_batch"),
            BatchFailureMode::ReportItemFailures => write!(f, "report_item_failures"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fixed pause before each fetch, bounding outbound request rate.
    pub qps_sleep_ms: u64,
    pub failure_mode: BatchFailureMode,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            qps_sleep_ms: profiled_env_u64(p, "QPS_SLEEP_MS", 50),
            failure_mode: profiled_env_parsed(p, "BATCH_FAILURE_MODE", BatchFailureMode::default())?,
        })
    }

    pub fn qps_sleep(&self) -> Duration {
        Duration::from_millis(self.qps_sleep_ms)
    }
}

// ── Planner ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub sources: Vec<String>,
    pub first_page: u32,
    pub last_page: u32,
}

impl PlannerConfig {
    fn from_env_profiled(p: &str, queue: &QueueConfig) -> Result<Self, CoreError> {
        let sources: Vec<String> = match profiled_env_opt(p, "PLANNER_SOURCES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None if !queue.queue_urls.is_empty() => queue.queue_urls.keys().cloned().collect(),
            None => DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
        };

        let first_page = profiled_env_u32(p, "PLANNER_FIRST_PAGE", 1);
        let last_page = profiled_env_u32(p, "PLANNER_LAST_PAGE", 10);
        if last_page < first_page {
            return Err(CoreError::Config(format!(
                "PLANNER_LAST_PAGE ({last_page}) is below PLANNER_FIRST_PAGE ({first_page})"
            )));
        }

        Ok(Self {
            sources,
            first_page,
            last_page,
        })
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        self.first_page..=self.last_page
    }
}
