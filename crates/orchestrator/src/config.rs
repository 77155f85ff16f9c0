//! Orchestrator configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::repository::ErrorCategory;

/// Environment variable overriding [`OrchestratorConfig::poll_interval`], in seconds.
pub const POLL_INTERVAL_ENV: &str = "ASYNCJOB_POLL_INTERVAL_SECS";

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Name for logging
    pub name: String,
    /// Pause between two status polls while partitions are in flight
    pub poll_interval: Duration,
    /// Error categories that abort the whole run when starting a job fails
    pub break_on: HashSet<ErrorCategory>,
    /// Values masked in every surfaced error message
    #[serde(skip_serializing)]
    pub secrets: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: "async-job-orchestrator".to_string(),
            poll_interval: Duration::from_secs(5),
            break_on: HashSet::new(),
            secrets: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults, with the poll interval read from [`POLL_INTERVAL_ENV`] when set.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(POLL_INTERVAL_ENV) {
            config.poll_interval = parse_poll_interval(&raw)?;
        }
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn break_on(mut self, category: ErrorCategory) -> Self {
        self.break_on.insert(category);
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.push(secret.into());
        self
    }

    pub fn is_breaking(&self, category: ErrorCategory) -> bool {
        self.break_on.contains(&category)
    }
}

fn parse_poll_interval(raw: &str) -> Result<Duration, OrchestratorError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| {
            OrchestratorError::Configuration(format!("{POLL_INTERVAL_ENV}={raw:?}: {e}"))
        })
}
