use crate::store::RetryPolicy;
use serde::{Deserialize, Serialize};

/// How workers report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// Shared in-memory counter, flushed every `flush_interval` increments
    /// and on completion.
    Fast,
    /// Every increment goes straight to the store.
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path:              String,
    pub listen_port:          u16,
    pub worker_count:         usize,
    /// Longest a worker sleeps when the queue has nothing due.
    pub poll_interval_ms:     u64,
    /// How long a claimed job stays invisible before redelivery.
    pub lease_ms:             i64,
    /// Per-record CRM call budget. Must stay below `lease_ms`.
    pub job_timeout_ms:       u64,
    /// Cap on concurrent CRM calls, including timed-out ones still running.
    pub crm_call_limit:       usize,
    pub max_attempts:         u32,
    pub retry_backoff_ms:     i64,
    pub retry_backoff_cap_ms: i64,
    /// K: flush the live counter every K increments.
    pub flush_interval:       u64,
    pub progress_mode:        ProgressMode,
    pub list_limit:           usize,
    pub crm_object_type:      String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path:              "simcrm.db".to_string(),
            listen_port:          4000,
            worker_count:         4,
            poll_interval_ms:     50,
            lease_ms:             30_000,
            job_timeout_ms:       10_000,
            crm_call_limit:       64,
            max_attempts:         5,
            retry_backoff_ms:     1_000,
            retry_backoff_cap_ms: 60_000,
            flush_interval:       10,
            progress_mode:        ProgressMode::Fast,
            list_limit:           50,
            crm_object_type:      "contacts".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Small timings for tests: fast polling, short backoff.
    pub fn default_test() -> Self {
        Self {
            db_path:              ":memory:".to_string(),
            worker_count:         4,
            poll_interval_ms:     5,
            lease_ms:             5_000,
            job_timeout_ms:       2_000,
            max_attempts:         3,
            retry_backoff_ms:     10,
            retry_backoff_cap_ms: 50,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.worker_count > 0, "worker_count must be > 0");
        anyhow::ensure!(self.flush_interval > 0, "flush_interval must be > 0");
        anyhow::ensure!(self.max_attempts > 0, "max_attempts must be > 0");
        anyhow::ensure!(self.lease_ms > 0, "lease_ms must be > 0");
        anyhow::ensure!(self.job_timeout_ms > 0, "job_timeout_ms must be > 0");
        anyhow::ensure!(
            i64::try_from(self.job_timeout_ms).map_or(false, |t| t < self.lease_ms),
            "lease_ms must be greater than job_timeout_ms"
        );
        anyhow::ensure!(
            self.crm_call_limit >= self.worker_count,
            "crm_call_limit must be >= worker_count"
        );
        anyhow::ensure!(self.list_limit > 0, "list_limit must be > 0");
        anyhow::ensure!(
            self.retry_backoff_ms >= 0 && self.retry_backoff_cap_ms >= self.retry_backoff_ms,
            "retry backoff must satisfy 0 <= retry_backoff_ms <= retry_backoff_cap_ms"
        );
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts:   self.max_attempts,
            backoff_ms:     self.retry_backoff_ms,
            backoff_cap_ms: self.retry_backoff_cap_ms,
        }
    }
}
