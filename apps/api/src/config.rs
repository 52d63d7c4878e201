use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use thiserror::Error;

use crate::bridge::poller::{PollSettings, DEFAULT_POLL_INTERVAL};
use crate::workflow_client::jobs::JobType;

/// Errors raised while assembling the workflow engine connection.
/// Any of these is fatal: the bridge refuses to start without a full config.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Required setting '{0}' is not set")]
    Missing(&'static str),

    #[error("Setting '{setting}' is not a valid URL: {reason}")]
    InvalidUrl { setting: &'static str, reason: String },

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),
}

/// Resolved connection settings for the workflow engine.
/// Built once at startup and shared by reference with the gateway and the poller.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub submission_endpoint: Url,
    pub status_endpoint_base: Url,
    pub credential_user: String,
    pub credential_secret: String,
}

impl ConnectionConfig {
    /// Builds the connection from a key lookup (normally the process environment).
    /// Blank values count as missing. Credentials are kept exactly as given.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let submission_endpoint = parse_url("KESTRA_FLOW_URL", &require("KESTRA_FLOW_URL")?)?;
        let status_endpoint_base = parse_url("KESTRA_BASE_URL", &require("KESTRA_BASE_URL")?)?;

        Ok(ConnectionConfig {
            submission_endpoint,
            status_endpoint_base,
            credential_user: require("KESTRA_USERNAME")?,
            credential_secret: require("KESTRA_PASSWORD")?,
        })
    }
}

fn parse_url(setting: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        setting,
        reason: e.to_string(),
    })
}

/// Application configuration loaded from environment variables.
/// Startup aborts if the workflow engine connection is incomplete.
#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub job: JobType,
    pub poll: PollSettings,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let lookup = |key: &str| std::env::var(key).ok();

        let connection = ConnectionConfig::from_lookup(lookup)
            .context("Workflow engine connection is misconfigured")?;
        let job = job_from_lookup(lookup)?;

        let interval = std::env::var("POLL_INTERVAL_MS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("POLL_INTERVAL_MS must be a number of milliseconds")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let max_duration = std::env::var("MAX_POLL_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("MAX_POLL_SECS must be a number of seconds")?
            .map(Duration::from_secs);

        Ok(Config {
            connection,
            job,
            poll: PollSettings {
                interval,
                max_duration,
            },
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Resolves the active job type plus its per-deployment overrides.
fn job_from_lookup<F>(lookup: F) -> Result<JobType, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let name = lookup("JOB_TYPE").unwrap_or_else(|| "career-ops".to_string());
    let mut job = JobType::from_name(&name).ok_or(ConfigError::UnknownJobType(name))?;

    if let Some(task) = lookup("OUTPUT_TASK_ID").filter(|v| !v.trim().is_empty()) {
        job.output_task = task.trim().to_string();
    }
    if let Some(status) = lookup("NO_OUTPUT_STATUS").filter(|v| !v.trim().is_empty()) {
        job.no_output_status = status.trim().to_string();
    }

    Ok(job)
}
