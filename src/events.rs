//! Diagnostics for the console: `tracing` setup and optional JSON event lines.
//!
//! Both go to stderr; stdout carries only action output.

use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

const FALLBACK_LOG_LEVEL: &str = "info";

/// `--log-level` as an env-filter directive; an invalid directive means `info`.
pub fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|error| {
        eprintln!("ignoring log level {level:?}: {error}");
        EnvFilter::new(FALLBACK_LOG_LEVEL)
    })
}

pub fn init_logging(cfg: &Config) -> Result<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(log_filter(&cfg.log_level))
        .with_target(true)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// One `{"ts", "type", "payload"}` record.
pub fn event_line<T: Serialize>(event_type: &str, payload: T, at: DateTime<Utc>) -> Value {
    json!({
        "ts": at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "type": event_type,
        "payload": payload,
    })
}

/// Writes `action_resolved`, `action_unmatched` and `rate_limited` records
/// when `--json-output` is on.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    json_output: bool,
}

impl EventEmitter {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    pub fn enabled(&self) -> bool {
        self.json_output
    }

    pub fn emit<T: Serialize>(&self, event_type: &str, payload: T) {
        if !self.json_output {
            return;
        }
        let line = event_line(event_type, payload, Utc::now());
        let _ = writeln!(io::stderr().lock(), "{line}");
    }
}
