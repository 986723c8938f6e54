//! Scheduler — turns a QUEUED simulation into a set of delayed jobs.
//!
//! start() is all-or-nothing: the N job inserts and the QUEUED → RUNNING
//! compare-and-set commit in one transaction. A concurrent second start
//! loses the compare-and-set and its inserts roll back with it.

use crate::{
    distribution::{expand_with, DistributionMethod},
    error::{SimError, SimResult},
    rng::ScheduleRng,
    simulation::{NewSimulation, Simulation, SimulationStatus},
    store::{JobQueue, SimStore, WorkItem},
    types::{now_millis, EpochMillis},
};

pub struct Scheduler {
    store: SimStore,
    queue: JobQueue,
}

impl Scheduler {
    /// The store and queue must share one database so scheduling can
    /// commit atomically.
    pub fn new(store: SimStore, queue: JobQueue) -> SimResult<Self> {
        if !store.database().same_as(queue.database()) {
            return Err(SimError::Validation(
                "scheduler store and queue must share one database".into(),
            ));
        }
        Ok(Self { store, queue })
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }

    pub fn create(&self, draft: &NewSimulation) -> SimResult<Simulation> {
        self.store.create(draft)
    }

    /// Work items for a simulation, with past timestamps pulled up to `now`.
    pub fn plan(&self, sim: &Simulation, now: EpochMillis) -> SimResult<Vec<WorkItem>> {
        let method: DistributionMethod = sim.distribution_method.parse()?;
        let mut rng = ScheduleRng::for_simulation(&sim.id);
        let times = expand_with(method, sim.total_records, sim.start_time, sim.end_time, &mut rng)?;
        Ok(times
            .into_iter()
            .zip(1..)
            .map(|(t, sequence_index)| WorkItem {
                simulation_id: sim.id.clone(),
                sequence_index,
                run_at: t.max(now),
            })
            .collect())
    }

    pub fn start(&self, simulation_id: &str) -> SimResult<usize> {
        self.start_at(simulation_id, now_millis())
    }

    /// Schedule every record of a QUEUED simulation and mark it RUNNING.
    /// Returns the number of jobs enqueued, always total_records.
    pub fn start_at(&self, simulation_id: &str, now: EpochMillis) -> SimResult<usize> {
        let sim = self
            .store
            .get(simulation_id)?
            .ok_or_else(|| SimError::NotFound { id: simulation_id.to_string() })?;

        if sim.status != SimulationStatus::Queued {
            return Err(invalid_state(&sim.id, sim.status));
        }

        let items = self.plan(&sim, now)?;

        let scheduled = self.store.database().transaction(|tx| {
            let enqueued = self.queue.enqueue_in(tx, &items, now)?;
            if enqueued as i64 != sim.total_records {
                return Err(SimError::Other(anyhow::anyhow!(
                    "simulation {} planned {enqueued} jobs for {} records",
                    sim.id,
                    sim.total_records
                )));
            }
            let started = SimStore::transition_in(
                tx,
                &sim.id,
                SimulationStatus::Queued,
                SimulationStatus::Running,
            )?;
            if !started {
                let actual = SimStore::status_in(tx, &sim.id)?
                    .ok_or_else(|| SimError::NotFound { id: sim.id.clone() })?;
                return Err(invalid_state(&sim.id, actual));
            }
            Ok(enqueued)
        })?;

        log::info!(
            "Simulation {}: scheduled {scheduled} jobs ({}, window {}..{})",
            sim.id, sim.distribution_method, sim.start_time, sim.end_time
        );
        Ok(scheduled)
    }
}

fn invalid_state(id: &str, actual: SimulationStatus) -> SimError {
    SimError::InvalidState {
        id:       id.to_string(),
        expected: SimulationStatus::Queued.as_str().to_string(),
        actual:   actual.as_str().to_string(),
    }
}
