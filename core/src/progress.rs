//! Progress aggregator — absorbs per-record increments and writes an
//! authoritative count back to the simulation store.
//!
//! In fast mode a shared counter takes every increment and the store is
//! written every `flush_interval` increments, and always when the live
//! value reaches total_records. In direct mode every increment is a
//! store write. The stored value never goes down in either mode.

use crate::{
    config::{EngineConfig, ProgressMode},
    error::{SimError, SimResult},
    simulation::{Simulation, SimulationStatus},
    store::SimStore,
    types::SimulationId,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// A shared per-simulation counter. Each call is one atomic mutation.
pub trait ProgressCounter: Send + Sync {
    /// Add one and return the new value. An unseen key starts at `baseline`.
    fn increment(&self, simulation_id: &str, baseline: i64) -> SimResult<i64>;

    fn get(&self, simulation_id: &str) -> SimResult<Option<i64>>;

    fn remove(&self, simulation_id: &str) -> SimResult<()>;

    /// Every key with a live value.
    fn keys(&self) -> SimResult<Vec<SimulationId>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCounter {
    counters: Mutex<HashMap<SimulationId, i64>>,
}

impl InMemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SimResult<std::sync::MutexGuard<'_, HashMap<SimulationId, i64>>> {
        self.counters
            .lock()
            .map_err(|_| SimError::StoreUnavailable("progress counter lock poisoned".into()))
    }
}

impl ProgressCounter for InMemoryCounter {
    fn increment(&self, simulation_id: &str, baseline: i64) -> SimResult<i64> {
        let mut counters = self.lock()?;
        let value = counters
            .entry(simulation_id.to_string())
            .or_insert(baseline);
        *value += 1;
        Ok(*value)
    }

    fn get(&self, simulation_id: &str) -> SimResult<Option<i64>> {
        Ok(self.lock()?.get(simulation_id).copied())
    }

    fn remove(&self, simulation_id: &str) -> SimResult<()> {
        self.lock()?.remove(simulation_id);
        Ok(())
    }

    fn keys(&self) -> SimResult<Vec<SimulationId>> {
        let mut keys: Vec<_> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

enum Tracking {
    Fast {
        counter:        Arc<dyn ProgressCounter>,
        flush_interval: i64,
    },
    Direct,
}

pub struct ProgressAggregator {
    store:    SimStore,
    tracking: Tracking,
}

impl ProgressAggregator {
    pub fn fast(store: SimStore, counter: Arc<dyn ProgressCounter>, flush_interval: u64) -> Self {
        Self {
            store,
            tracking: Tracking::Fast {
                counter,
                flush_interval: flush_interval.max(1) as i64,
            },
        }
    }

    pub fn direct(store: SimStore) -> Self {
        Self { store, tracking: Tracking::Direct }
    }

    pub fn from_config(store: SimStore, config: &EngineConfig) -> Self {
        match config.progress_mode {
            ProgressMode::Fast => {
                Self::fast(store, Arc::new(InMemoryCounter::new()), config.flush_interval)
            }
            ProgressMode::Direct => Self::direct(store),
        }
    }

    pub fn mode(&self) -> ProgressMode {
        match self.tracking {
            Tracking::Fast { .. } => ProgressMode::Fast,
            Tracking::Direct => ProgressMode::Direct,
        }
    }

    /// Count one processed record and return the live value.
    pub fn increment(&self, sim: &Simulation) -> SimResult<i64> {
        match &self.tracking {
            Tracking::Fast { counter, flush_interval } => {
                let live = counter.increment(&sim.id, sim.records_processed)?;
                if live >= sim.total_records || live % flush_interval == 0 {
                    self.store.set_processed(&sim.id, live)?;
                    log::debug!("Simulation {}: flushed progress {live}", sim.id);
                }
                Ok(live)
            }
            Tracking::Direct => self.store.increment_processed(&sim.id, 1),
        }
    }

    /// Live value, if this aggregator buffers one for the simulation.
    pub fn live(&self, simulation_id: &str) -> SimResult<Option<i64>> {
        match &self.tracking {
            Tracking::Fast { counter, .. } => counter.get(simulation_id),
            Tracking::Direct => Ok(None),
        }
    }

    /// Write the live value to the store. Returns the value written.
    pub fn flush(&self, simulation_id: &str) -> SimResult<Option<i64>> {
        let Some(live) = self.live(simulation_id)? else {
            return Ok(None);
        };
        self.store.set_processed(simulation_id, live)?;
        log::debug!("Simulation {simulation_id}: flushed progress {live}");
        Ok(Some(live))
    }

    /// Final flush and RUNNING → COMPLETED. Returns true if this call
    /// performed the transition.
    pub fn complete(&self, simulation_id: &str) -> SimResult<bool> {
        self.flush(simulation_id)?;
        let completed = self.store.transition(
            simulation_id,
            SimulationStatus::Running,
            SimulationStatus::Completed,
        )?;
        if let Tracking::Fast { counter, .. } = &self.tracking {
            counter.remove(simulation_id)?;
        }
        Ok(completed)
    }

    /// Complete every RUNNING simulation whose persisted count already
    /// reached its total. Covers a final write that failed after its job
    /// was acked, so no later job would trigger completion.
    pub fn complete_finished(&self) -> SimResult<usize> {
        let mut completed = 0;
        for sim in self.store.running()? {
            if sim.records_processed >= sim.total_records && self.complete(&sim.id)? {
                log::info!(
                    "Simulation {} completed on reconcile ({} records)",
                    sim.id, sim.total_records
                );
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Flush every simulation with a live value, once each, then complete
    /// the ones that reached their total. Returns how many were flushed;
    /// the first failure is returned after all were tried.
    pub fn shutdown_flush(&self) -> SimResult<usize> {
        let Tracking::Fast { counter, .. } = &self.tracking else {
            return Ok(0);
        };
        let mut flushed = 0;
        let mut first_err = None;
        for id in counter.keys()? {
            match self.flush(&id) {
                Ok(_) => flushed += 1,
                Err(e) => {
                    log::error!("Shutdown flush failed for simulation {id}: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.complete_finished() {
            log::error!("Shutdown completion sweep failed: {e}");
            first_err.get_or_insert(e);
        }
        log::info!("Shutdown flush wrote progress for {flushed} simulation(s)");
        match first_err {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }
}
