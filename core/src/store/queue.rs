//! Durable delay queue backed by the `job_queue` table.
//!
//! Delivery is at-least-once. A claimed job carries a lease; if the
//! worker dies before acking, the lease expires and the job becomes
//! claimable again. Failed jobs are retried with exponential backoff
//! until `max_attempts`, then dead-lettered (kept, never deleted).

use super::Database;
use crate::{
    error::SimResult,
    types::{EpochMillis, SimulationId},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One unit of record creation to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub simulation_id:  SimulationId,
    /// 1-based position within the simulation's record set.
    pub sequence_index: i64,
    pub run_at:         EpochMillis,
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id:             i64,
    pub simulation_id:  SimulationId,
    pub sequence_index: i64,
    pub run_at:         EpochMillis,
    /// Includes the current delivery.
    pub attempts:       u32,
    pub max_attempts:   u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub id:             i64,
    pub simulation_id:  SimulationId,
    pub sequence_index: i64,
    pub attempts:       u32,
    pub last_error:     Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retry { run_at: EpochMillis },
    DeadLettered,
    /// The lease expired and the job was claimed again; nothing changed.
    LeaseLost,
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts:   u32,
    pub backoff_ms:     i64,
    pub backoff_cap_ms: i64,
}

impl RetryPolicy {
    /// Delay before the next delivery after `attempts` failed deliveries.
    pub fn backoff(&self, attempts: u32) -> i64 {
        let exp = attempts.saturating_sub(1).min(32);
        self.backoff_ms
            .saturating_mul(1i64 << exp)
            .min(self.backoff_cap_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts:   5,
            backoff_ms:     1_000,
            backoff_cap_ms: 60_000,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    db:       Database,
    policy:   RetryPolicy,
    lease_ms: i64,
}

impl JobQueue {
    pub fn new(db: Database, policy: RetryPolicy, lease_ms: i64) -> Self {
        Self { db, policy, lease_ms }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enqueue items in their own transaction.
    pub fn enqueue(&self, items: &[WorkItem], now: EpochMillis) -> SimResult<usize> {
        self.db.transaction(|tx| self.enqueue_in(tx, items, now))
    }

    /// Enqueue items on a caller-owned connection or transaction.
    /// Items are inserted in order, so equal `run_at` values fire FIFO.
    pub fn enqueue_in(
        &self,
        conn: &Connection,
        items: &[WorkItem],
        now: EpochMillis,
    ) -> SimResult<usize> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO job_queue (
                simulation_id, sequence_index, run_at, max_attempts, status, enqueued_at
             ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        )?;
        for item in items {
            stmt.execute(params![
                item.simulation_id,
                item.sequence_index,
                item.run_at,
                self.policy.max_attempts,
                now,
            ])?;
        }
        Ok(items.len())
    }

    /// Claim the earliest due job, if any.
    pub fn claim(&self, now: EpochMillis) -> SimResult<Option<ClaimedJob>> {
        self.db.with_conn(|conn| {
            let job = conn
                .query_row(
                    "UPDATE job_queue
                     SET status = 'claimed', attempts = attempts + 1, lease_until = ?2
                     WHERE id = (
                        SELECT id FROM job_queue
                        WHERE (status = 'pending' AND run_at <= ?1)
                           OR (status = 'claimed' AND lease_until <= ?1)
                        ORDER BY run_at ASC, id ASC
                        LIMIT 1
                     )
                     RETURNING id, simulation_id, sequence_index, run_at, attempts, max_attempts",
                    params![now, now.saturating_add(self.lease_ms)],
                    |row| {
                        Ok(ClaimedJob {
                            id:             row.get(0)?,
                            simulation_id:  row.get(1)?,
                            sequence_index: row.get(2)?,
                            run_at:         row.get(3)?,
                            attempts:       row.get(4)?,
                            max_attempts:   row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(job)
        })
    }

    /// Remove a successfully processed job. Returns false when the caller
    /// no longer holds the job: its lease expired and it was claimed again.
    /// `attempts` is the fencing token; every claim bumps it.
    pub fn ack(&self, job: &ClaimedJob) -> SimResult<bool> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM job_queue WHERE id = ?1 AND status = 'claimed' AND attempts = ?2",
                params![job.id, job.attempts],
            )?;
            if removed == 0 {
                log::warn!(
                    "Job {} (simulation {}, record {}) lost its lease before ack",
                    job.id, job.simulation_id, job.sequence_index
                );
            }
            Ok(removed == 1)
        })
    }

    /// Record a failed delivery: schedule a retry or dead-letter the job.
    pub fn fail(&self, job: &ClaimedJob, reason: &str, now: EpochMillis) -> SimResult<FailOutcome> {
        self.db.with_conn(|conn| {
            if job.attempts >= job.max_attempts {
                let changed = conn.execute(
                    "UPDATE job_queue
                     SET status = 'dead', lease_until = NULL, last_error = ?3
                     WHERE id = ?1 AND status = 'claimed' AND attempts = ?2",
                    params![job.id, job.attempts, reason],
                )?;
                if changed == 0 {
                    return Ok(FailOutcome::LeaseLost);
                }
                log::error!(
                    "Job {} (simulation {}, record {}) dead-lettered after {} attempts: {reason}",
                    job.id, job.simulation_id, job.sequence_index, job.attempts
                );
                return Ok(FailOutcome::DeadLettered);
            }
            let run_at = now.saturating_add(self.policy.backoff(job.attempts));
            let changed = conn.execute(
                "UPDATE job_queue
                 SET status = 'pending', lease_until = NULL, run_at = ?3, last_error = ?4
                 WHERE id = ?1 AND status = 'claimed' AND attempts = ?2",
                params![job.id, job.attempts, run_at, reason],
            )?;
            if changed == 0 {
                return Ok(FailOutcome::LeaseLost);
            }
            log::warn!(
                "Job {} (simulation {}, record {}) failed attempt {}/{}, retry at {run_at}: {reason}",
                job.id, job.simulation_id, job.sequence_index, job.attempts, job.max_attempts
            );
            Ok(FailOutcome::Retry { run_at })
        })
    }

    /// Live (not dead-lettered) jobs for one simulation.
    pub fn count_for(&self, simulation_id: &str) -> SimResult<i64> {
        self.db.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM job_queue WHERE simulation_id = ?1 AND status != 'dead'",
                params![simulation_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    /// Live jobs across all simulations.
    pub fn outstanding(&self) -> SimResult<i64> {
        self.db.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM job_queue WHERE status != 'dead'",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    pub fn dead_letters(&self, simulation_id: &str) -> SimResult<Vec<DeadLetter>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, simulation_id, sequence_index, attempts, last_error
                 FROM job_queue WHERE simulation_id = ?1 AND status = 'dead'
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![simulation_id], |row| {
                    Ok(DeadLetter {
                        id:             row.get(0)?,
                        simulation_id:  row.get(1)?,
                        sequence_index: row.get(2)?,
                        attempts:       row.get(3)?,
                        last_error:     row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Earliest instant at which some job becomes claimable.
    pub fn next_due_at(&self) -> SimResult<Option<EpochMillis>> {
        self.db.with_conn(|conn| {
            let at = conn.query_row(
                "SELECT MIN(CASE WHEN status = 'pending' THEN run_at ELSE lease_until END)
                 FROM job_queue WHERE status IN ('pending', 'claimed')",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )?;
            Ok(at)
        })
    }
}
