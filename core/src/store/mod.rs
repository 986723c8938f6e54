//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! The scheduler, workers and aggregator call store methods; they never
//! execute SQL directly.
//!
//! One connection is shared by every handle behind a mutex. Calls are
//! short single statements or one short transaction; nothing holds the
//! lock across a CRM call.

mod queue;

pub use queue::{ClaimedJob, DeadLetter, FailOutcome, JobQueue, RetryPolicy, WorkItem};

use crate::{
    error::{SimError, SimResult},
    simulation::{NewSimulation, Simulation, SimulationStatus},
    types::now_millis,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

/// A shared handle to the engine database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Apply all schema migrations in order. Safe to run on every start.
    pub fn migrate(&self) -> SimResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../../migrations/001_simulations.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_job_queue.sql"))?;
        Ok(())
    }

    /// True when both handles point at the same connection.
    pub fn same_as(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SimResult<T>) -> SimResult<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction. Any error rolls back everything `f` wrote.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> SimResult<T>) -> SimResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SimError::StoreUnavailable("database connection lock poisoned".into()))
    }
}

/// Durable record of every simulation and its lifecycle status.
#[derive(Clone)]
pub struct SimStore {
    db: Database,
}

const SIMULATION_COLUMNS: &str = "id, user_id, status, scenario, distribution_method,
    total_records, records_processed, start_time, end_time, created_at, updated_at";

impl SimStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── Create / read ──────────────────────────────────────────

    pub fn create(&self, draft: &NewSimulation) -> SimResult<Simulation> {
        let now = now_millis();
        let sim = Simulation {
            id:                  uuid::Uuid::new_v4().to_string(),
            user_id:             draft.user_id.clone(),
            status:              SimulationStatus::Queued,
            scenario:            draft.scenario.clone(),
            distribution_method: draft.distribution_method.as_str().to_string(),
            total_records:       draft.total_records,
            records_processed:   0,
            start_time:          draft.start_time,
            end_time:            draft.end_time,
            created_at:          now,
            updated_at:          now,
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO simulations (
                    id, user_id, status, scenario, distribution_method,
                    total_records, records_processed, start_time, end_time,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    sim.id,
                    sim.user_id,
                    sim.status.as_str(),
                    sim.scenario,
                    sim.distribution_method,
                    sim.total_records,
                    sim.records_processed,
                    sim.start_time,
                    sim.end_time,
                    sim.created_at,
                    sim.updated_at,
                ],
            )?;
            Ok(())
        })?;
        log::info!(
            "Simulation {} created for user {} ({} records, {})",
            sim.id, sim.user_id, sim.total_records, sim.distribution_method
        );
        Ok(sim)
    }

    pub fn get(&self, id: &str) -> SimResult<Option<Simulation>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SIMULATION_COLUMNS} FROM simulations WHERE id = ?1");
            let sim = conn
                .query_row(&sql, params![id], simulation_from_row)
                .optional()?;
            Ok(sim)
        })
    }

    /// Most recent first, at most `limit` rows.
    pub fn list_by_user(&self, user_id: &str, limit: usize) -> SimResult<Vec<Simulation>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SIMULATION_COLUMNS} FROM simulations
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id, limit as i64], simulation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Compare-and-set on status. Returns false when the current status
    /// is not `from` (or the simulation does not exist).
    pub fn transition(
        &self,
        id: &str,
        from: SimulationStatus,
        to: SimulationStatus,
    ) -> SimResult<bool> {
        self.db.with_conn(|conn| Self::transition_in(conn, id, from, to))
    }

    pub(crate) fn transition_in(
        conn: &Connection,
        id: &str,
        from: SimulationStatus,
        to: SimulationStatus,
    ) -> SimResult<bool> {
        if from.successor() != Some(to) {
            return Err(SimError::InvalidState {
                id:       id.to_string(),
                expected: from.successor().map_or("none", |s| s.as_str()).to_string(),
                actual:   to.as_str().to_string(),
            });
        }
        let changed = conn.execute(
            "UPDATE simulations SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?2",
            params![id, from.as_str(), to.as_str(), now_millis()],
        )?;
        if changed == 1 {
            log::info!("Simulation {id}: {from} -> {to}");
        }
        Ok(changed == 1)
    }

    pub(crate) fn status_in(conn: &Connection, id: &str) -> SimResult<Option<SimulationStatus>> {
        let status = conn
            .query_row(
                "SELECT status FROM simulations WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        status.map(|s| s.parse()).transpose()
    }

    // ── Progress ───────────────────────────────────────────────

    /// Add `delta` to the stored count (capped at total_records) and
    /// return the new value.
    pub fn increment_processed(&self, id: &str, delta: i64) -> SimResult<i64> {
        if delta < 0 {
            return Err(SimError::Validation(format!("progress delta must be >= 0, got {delta}")));
        }
        self.db.with_conn(|conn| {
            conn.query_row(
                "UPDATE simulations
                 SET records_processed = MIN(total_records, records_processed + ?2),
                     updated_at = ?3
                 WHERE id = ?1
                 RETURNING records_processed",
                params![id, delta, now_millis()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .ok_or_else(|| SimError::NotFound { id: id.to_string() })
        })
    }

    /// Authoritative write of an absolute count. Never lowers the stored
    /// value; values above total_records are capped.
    pub fn set_processed(&self, id: &str, value: i64) -> SimResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE simulations
                 SET records_processed = MAX(records_processed, MIN(total_records, ?2)),
                     updated_at = ?3
                 WHERE id = ?1",
                params![id, value, now_millis()],
            )?;
            if changed == 0 {
                return Err(SimError::NotFound { id: id.to_string() });
            }
            Ok(())
        })
    }

    /// Simulations still RUNNING, oldest first.
    pub fn running(&self) -> SimResult<Vec<Simulation>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SIMULATION_COLUMNS} FROM simulations
                 WHERE status = 'RUNNING' ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], simulation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn simulation_from_row(row: &Row<'_>) -> rusqlite::Result<Simulation> {
    let status: String = row.get(2)?;
    let status = status.parse::<SimulationStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Simulation {
        id:                  row.get(0)?,
        user_id:             row.get(1)?,
        status,
        scenario:            row.get(3)?,
        distribution_method: row.get(4)?,
        total_records:       row.get(5)?,
        records_processed:   row.get(6)?,
        start_time:          row.get(7)?,
        end_time:            row.get(8)?,
        created_at:          row.get(9)?,
        updated_at:          row.get(10)?,
    })
}
