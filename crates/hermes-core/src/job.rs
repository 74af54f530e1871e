use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Address;
use crate::retry::RetryPolicy;

/// What to do with an address whose record already exists in the output
/// directory when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingOutputPolicy {
    /// Fetch again and replace the stored record.
    Overwrite,
    /// Leave the stored record alone and do not dispatch the address.
    Skip,
}

impl ExistingOutputPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExistingOutputPolicy::Overwrite => "overwrite",
            ExistingOutputPolicy::Skip => "skip",
        }
    }
}

impl fmt::Display for ExistingOutputPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExistingOutputPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(ExistingOutputPolicy::Overwrite),
            "skip" => Ok(ExistingOutputPolicy::Skip),
            _ => Err(format!("Unknown existing-output policy: {}", s)),
        }
    }
}

/// Run-level configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub concurrency_limit: usize,
    /// Minimum spacing between any two fetches of the run. Zero disables.
    pub rate_limit_interval: Duration,
    /// Bound on a single fetch attempt.
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    /// Base of the increasing, jittered wait before each retry.
    pub retry_backoff: Duration,
    pub output_dir: PathBuf,
    pub on_existing: ExistingOutputPolicy,
}

impl BatchConfig {
    /// The existing-output policy has no default: callers must choose.
    pub fn new(output_dir: impl Into<PathBuf>, on_existing: ExistingOutputPolicy) -> Self {
        Self {
            concurrency_limit: 3,
            rate_limit_interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            output_dir: output_dir.into(),
            on_existing,
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Check the ranges a run needs before anything starts.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency_limit == 0 {
            return Err(AppError::ConfigError(
                "concurrency_limit must be at least 1".into(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "fetch_timeout must be greater than zero".into(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(AppError::ConfigError("output_dir must not be empty".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.retry_backoff,
        }
    }
}

/// One invocation: the address list plus its configuration.
///
/// Duplicates in `addresses` are kept and processed independently.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: Uuid,
    pub addresses: Vec<Address>,
    pub config: BatchConfig,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    /// Validates the configuration; an invalid job never reaches a worker.
    pub fn new(addresses: Vec<Address>, config: BatchConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            addresses,
            config,
            created_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
