use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::backoff::BackoffPolicy;
use crate::ratelimit::GovernorConfig;
use crate::resolver::ResolverConfig;

pub const DEFAULT_BASE_URL: &str = "https://api.spacetraders.io/v2";
const BASE_URL_ENV: &str = "SPACETRADERS_BASE_URL";
const TOKEN_FILE_ENV: &str = "SPACETRADERS_TOKEN_FILE";

#[derive(Debug, Args, Clone)]
pub struct Config {
    /// API root (default: $SPACETRADERS_BASE_URL or the public v2 API)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Where the agent token is persisted after registering
    #[arg(long, global = true)]
    pub token_file: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit JSON event lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    pub json_output: bool,

    /// Retries after a rate-limit wait (-1 = unlimited)
    #[arg(long, global = true, default_value_t = 5, allow_negative_numbers = true)]
    pub max_retries: i64,

    #[arg(long, global = true, default_value_t = 1000)]
    pub retry_base_delay_ms: u64,

    #[arg(long, global = true, default_value_t = 1000)]
    pub max_jitter_ms: u64,

    /// Shortest consecutive run that counts for matching
    #[arg(long, global = true, default_value_t = 4)]
    pub min_run: usize,

    /// Share of an action name a run must cover to be accepted
    #[arg(long, global = true, default_value_t = 0.75)]
    pub gate_ratio: f64,

    /// Suggestions shown when nothing matches
    #[arg(long, global = true, default_value_t = 5)]
    pub suggestions: usize,

    #[arg(long, global = true, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn base_url(&self) -> String {
        resolve_base_url(self.base_url.as_deref(), std::env::var(BASE_URL_ENV).ok().as_deref())
    }

    pub fn token_path(&self) -> PathBuf {
        self.token_file
            .clone()
            .or_else(|| std::env::var_os(TOKEN_FILE_ENV).map(PathBuf::from))
            .unwrap_or_else(default_token_path)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            min_run: self.min_run.max(1),
            gate_ratio: self.gate_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            retry: BackoffPolicy::from_sentinel(self.max_retries, self.retry_base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn resolve_base_url(flag: Option<&str>, env: Option<&str>) -> String {
    flag.or(env)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_string()
}

fn default_token_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("traders-console").join("token"))
        .unwrap_or_else(|| PathBuf::from("./tmp/token"))
}
