use anyhow::{Result, ensure};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the bulk user manager
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Litmos API root (default: "https://api.litmos.com/v1.svc")
    pub litmos_base_url: String,

    /// Litmos API key sent as the `apikey` header on lookups
    pub litmos_api_key: String,

    /// Litmos `source` query parameter (default: "sourceapp")
    pub litmos_source: String,

    /// Endpoint receiving per-row activate/deactivate actions.
    /// Falls back to `{litmos_base_url}/users` when unset.
    pub litmos_action_url: Option<String>,

    /// Bearer token for per-row actions. Uploads are refused without it.
    pub litmos_api_token: Option<String>,

    /// Minimum number of data rows an upload must carry (default: 30)
    pub min_records: usize,

    /// Maximum number of data rows an upload may carry (default: 100).
    /// Zero disables the cap in the job runner.
    pub max_records: usize,

    /// Rows calling the upstream API at the same time (default: 2)
    pub max_workers: usize,

    /// Rows submitted but not yet finished (default: 4)
    pub max_inflight: usize,

    /// Timeout for a single outbound request (default: 30s)
    pub outbound_timeout: Duration,

    /// Idle connections kept per upstream host (default: 10)
    pub pool_max_idle_per_host: usize,

    /// Retries on transport errors and 429/5xx (default: 3)
    pub max_retries: u32,

    /// Exponential backoff factor in seconds (default: 0.5)
    pub backoff_factor: f64,

    /// Pause between row submissions (default: 20ms)
    pub user_op_delay: Duration,

    /// Directory holding `debug.jsonl` (default: "/tmp/logs")
    pub log_dir: PathBuf,

    /// Directory uploads are staged in (default: system temp dir)
    pub upload_dir: PathBuf,

    /// Maximum multipart body size in bytes (default: 10 MB)
    pub max_upload_size: usize,

    /// HTTP listen port (default: 5000)
    pub port: u16,

    /// Return internal error messages to clients (default: false)
    pub expose_error_details: bool,

    /// How long finished jobs stay pollable (default: 24h)
    pub job_retention: Duration,

    /// How often the job reaper runs (default: 10 min)
    pub reaper_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            litmos_base_url: "https://api.litmos.com/v1.svc".to_string(),
            litmos_api_key: String::new(),
            litmos_source: "sourceapp".to_string(),
            litmos_action_url: None,
            litmos_api_token: None,
            min_records: 30,
            max_records: 100,
            max_workers: 2,
            max_inflight: 4,
            outbound_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 10,
            max_retries: 3,
            backoff_factor: 0.5,
            user_op_delay: Duration::from_millis(20),
            log_dir: PathBuf::from("/tmp/logs"),
            upload_dir: env::temp_dir(),
            max_upload_size: 10 * 1024 * 1024, // 10 MB
            port: 5000,
            expose_error_details: false,
            job_retention: Duration::from_secs(24 * 60 * 60),
            reaper_interval: Duration::from_secs(600),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_source<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            litmos_base_url: non_empty("LITMOS_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.litmos_base_url),

            litmos_api_key: lookup("LITMOS_API_KEY").unwrap_or(default.litmos_api_key),

            litmos_source: non_empty("LITMOS_SOURCE").unwrap_or(default.litmos_source),

            litmos_action_url: non_empty("LITMOS_API_DEACT_URL")
                .or_else(|| non_empty("LITMOS_API_URL")),

            litmos_api_token: non_empty("LITMOS_API_TOKEN"),

            min_records: parsed(&lookup, "MIN_RECORDS").unwrap_or(default.min_records),

            max_records: parsed(&lookup, "MAX_RECORDS").unwrap_or(default.max_records),

            max_workers: parsed(&lookup, "BG_MAX_WORKERS").unwrap_or(default.max_workers),

            max_inflight: parsed(&lookup, "BG_MAX_INFLIGHT").unwrap_or(default.max_inflight),

            outbound_timeout: parsed(&lookup, "OUTBOUND_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(default.outbound_timeout),

            pool_max_idle_per_host: parsed(&lookup, "CONNECTION_POOL_SIZE")
                .unwrap_or(default.pool_max_idle_per_host),

            max_retries: parsed(&lookup, "MAX_RETRIES").unwrap_or(default.max_retries),

            backoff_factor: parsed(&lookup, "BACKOFF_FACTOR").unwrap_or(default.backoff_factor),

            user_op_delay: parsed(&lookup, "USER_OP_DELAY")
                .and_then(|secs: f64| Duration::try_from_secs_f64(secs).ok())
                .unwrap_or(default.user_op_delay),

            log_dir: non_empty("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.log_dir),

            upload_dir: non_empty("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            max_upload_size: parsed(&lookup, "MAX_UPLOAD_SIZE").unwrap_or(default.max_upload_size),

            port: parsed(&lookup, "PORT").unwrap_or(default.port),

            expose_error_details: lookup("DEV_SHOW_TRACEBACK")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default.expose_error_details),

            job_retention: parsed(&lookup, "JOB_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.job_retention),

            reaper_interval: parsed(&lookup, "JOB_REAPER_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.reaper_interval),
        }
    }

    /// Create config for local development (no submission delay, relaxed bounds)
    pub fn development() -> Self {
        Self {
            min_records: 1,
            user_op_delay: Duration::ZERO,
            backoff_factor: 0.0,
            expose_error_details: true,
            ..Self::default()
        }
    }

    /// Endpoint used for per-row actions
    pub fn action_url(&self) -> String {
        self.litmos_action_url
            .clone()
            .unwrap_or_else(|| format!("{}/users", self.litmos_base_url))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_workers >= 1, "BG_MAX_WORKERS must be at least 1");
        ensure!(self.max_inflight >= 1, "BG_MAX_INFLIGHT must be at least 1");
        ensure!(
            !self.reaper_interval.is_zero(),
            "JOB_REAPER_INTERVAL_SECS must be positive"
        );
        ensure!(
            self.backoff_factor.is_finite() && self.backoff_factor >= 0.0,
            "BACKOFF_FACTOR must be a non-negative number"
        );
        ensure!(
            self.max_records == 0 || self.min_records <= self.max_records,
            "MIN_RECORDS ({}) exceeds MAX_RECORDS ({})",
            self.min_records,
            self.max_records
        );
        Ok(())
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
