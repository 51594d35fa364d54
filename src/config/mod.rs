//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::time::Duration;

use crate::engine::stage::StageKind;
use crate::engine::worker::WorkerConfig;
use crate::error::{Error, Result};
use crate::event::SUBJECT_IDEA_CLAIMED;
use crate::storage::LeasePolicy;
use secrecy::SecretString;

pub const DEFAULT_WORKER_ID: &str = "worker-1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Separate database for LISTEN/NOTIFY; `None` reuses the store pool.
    pub bus_database_url: Option<SecretString>,
    pub worker_id: String,
    pub poll_interval: Duration,
    pub store_timeout: Duration,
    pub stages: Vec<StageKind>,
    pub notify_channel: String,
    pub openai_api_key: Option<SecretString>,
    pub openai_model: String,
    pub lease: Option<LeasePolicy>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let worker_id = non_empty("WORKER_ID").unwrap_or_else(|| DEFAULT_WORKER_ID.to_string());

        let stages = match non_empty("WORKER_STAGES") {
            Some(list) => StageKind::parse_list(&list)?,
            None => vec![StageKind::Notify],
        };

        let openai_api_key = non_empty("OPENAI_API_KEY").map(SecretString::from);
        if stages.contains(&StageKind::Generate) && openai_api_key.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required when the generate stage is enabled".to_string(),
            ));
        }

        let lease = match non_empty("LEASE_SECS") {
            Some(secs) => {
                let max_attempts = match non_empty("MAX_ATTEMPTS") {
                    Some(n) => parse_positive::<u32>("MAX_ATTEMPTS", &n)?,
                    None => DEFAULT_MAX_ATTEMPTS,
                };
                let duration = Duration::try_from_secs_f64(parse_positive::<f64>("LEASE_SECS", &secs)?)
                    .map_err(|e| Error::Config(format!("LEASE_SECS out of range: {e}")))?;
                Some(LeasePolicy::new(duration, max_attempts))
            }
            None => None,
        };

        let store_timeout = match non_empty("STORE_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(parse_positive::<u64>("STORE_TIMEOUT_MS", &ms)?),
            None => DEFAULT_STORE_TIMEOUT,
        };

        Ok(Self {
            database_url: SecretString::from(required_var(&var, "DATABASE_URL")?),
            bus_database_url: non_empty("BUS_DATABASE_URL").map(SecretString::from),
            worker_id,
            poll_interval: poll_interval(var("POLL_EVERY_MS").as_deref()),
            store_timeout,
            stages,
            notify_channel: non_empty("NOTIFY_CHANNEL")
                .unwrap_or_else(|| SUBJECT_IDEA_CLAIMED.to_string()),
            openai_api_key,
            openai_model: non_empty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            lease,
            otel_endpoint: non_empty("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The worker-loop view of this configuration.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_id: self.worker_id.clone(),
            poll_interval: self.poll_interval,
            store_timeout: self.store_timeout,
            lease: self.lease,
        }
    }
}

/// Milliseconds, fractional allowed. Anything unusable keeps the default.
fn poll_interval(raw: Option<&str>) -> Duration {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}

fn parse_positive<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(Error::Config(format!("{name} must be a positive number, got {raw:?}"))),
    }
}

fn required_var(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    var(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}
