//! The Simulation record and its lifecycle status.

use crate::{
    distribution::{validate_window, DistributionMethod},
    error::{SimError, SimResult},
    types::{EpochMillis, SimulationId, UserId},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle: QUEUED → RUNNING → COMPLETED. Never skips, never reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Queued,
    Running,
    Completed,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued    => "QUEUED",
            Self::Running   => "RUNNING",
            Self::Completed => "COMPLETED",
        }
    }

    /// The only status this one may move to, if any.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Queued    => Some(Self::Running),
            Self::Running   => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl FromStr for SimulationStatus {
    type Err = SimError;

    fn from_str(s: &str) -> SimResult<Self> {
        match s {
            "QUEUED"    => Ok(Self::Queued),
            "RUNNING"   => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(SimError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    pub id:                  SimulationId,
    pub user_id:             UserId,
    pub status:              SimulationStatus,
    pub scenario:            String,
    pub distribution_method: String,
    pub total_records:       i64,
    pub records_processed:   i64,
    pub start_time:          EpochMillis,
    pub end_time:            EpochMillis,
    pub created_at:          EpochMillis,
    pub updated_at:          EpochMillis,
}

/// A validated creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSimulation {
    pub user_id:             UserId,
    pub scenario:            String,
    pub distribution_method: DistributionMethod,
    pub total_records:       i64,
    pub start_time:          EpochMillis,
    pub end_time:            EpochMillis,
}

impl NewSimulation {
    /// Validate raw request fields. `start_time` defaults to `now`,
    /// `end_time` defaults to `start_time`.
    pub fn validate(
        user_id: Option<&str>,
        scenario: Option<&str>,
        distribution_method: Option<&str>,
        total_records: Option<i64>,
        start_time: Option<EpochMillis>,
        end_time: Option<EpochMillis>,
        now: EpochMillis,
    ) -> SimResult<Self> {
        let user_id = required("userId", user_id)?;
        let scenario = required("scenario", scenario)?;
        let method = required("distributionMethod", distribution_method)?;
        let total_records = total_records
            .filter(|n| *n > 0)
            .ok_or_else(|| SimError::Validation("totalRecords must be > 0".into()))?;

        let distribution_method = method
            .parse::<DistributionMethod>()
            .map_err(|e| SimError::Validation(e.to_string()))?;

        let start_time = start_time.unwrap_or(now);
        let end_time = end_time.unwrap_or(start_time);
        validate_window(total_records, start_time, end_time)
            .map_err(|e| SimError::Validation(e.to_string()))?;

        Ok(Self {
            user_id,
            scenario,
            distribution_method,
            total_records,
            start_time,
            end_time,
        })
    }
}

fn required(field: &str, value: Option<&str>) -> SimResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(SimError::Validation(format!("{field} is required"))),
    }
}
