//! Worker pool — claims due jobs, performs the CRM side effect, counts
//! progress and completes simulations.
//!
//! RULES:
//!   - A failing job never takes down its worker or its siblings.
//!   - No lock is held across the CRM call.
//!   - Retries come from the queue's policy; workers never loop on a job.

use crate::{
    config::EngineConfig,
    crm::{CredentialResolver, CrmClient, RecordProperties},
    error::{SimError, SimResult},
    progress::ProgressAggregator,
    simulation::{Simulation, SimulationStatus},
    store::{ClaimedJob, FailOutcome, JobQueue, SimStore},
    types::{now_millis, EpochMillis},
};
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Record created and counted; carries the live progress value.
    Processed { live: i64 },
    /// Record created and this job completed the simulation.
    SimulationCompleted,
    /// The owning simulation no longer exists; job dropped.
    Orphaned,
    /// The simulation had already completed; job dropped.
    Skipped,
    Retried { run_at: EpochMillis },
    DeadLettered,
    /// The lease expired mid-flight and another worker holds the job now;
    /// this delivery is neither counted nor requeued.
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub job_timeout:   Duration,
    pub object_type:   String,
    /// Most CRM calls allowed to run at once, counting timed-out calls
    /// that have not returned yet.
    pub call_limit:    usize,
}

impl WorkerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            job_timeout:   Duration::from_millis(config.job_timeout_ms),
            object_type:   config.crm_object_type.clone(),
            call_limit:    config.crm_call_limit.max(1),
        }
    }
}

/// Processes single jobs. Shared by every pool thread.
pub struct Worker {
    store:       SimStore,
    queue:       JobQueue,
    progress:    Arc<ProgressAggregator>,
    crm:         Arc<dyn CrmClient>,
    credentials: Arc<dyn CredentialResolver>,
    settings:    WorkerSettings,
    in_flight:   Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(
        store: SimStore,
        queue: JobQueue,
        progress: Arc<ProgressAggregator>,
        crm: Arc<dyn CrmClient>,
        credentials: Arc<dyn CredentialResolver>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            progress,
            crm,
            credentials,
            settings,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.progress
    }

    /// CRM calls currently running, including abandoned ones.
    pub fn calls_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim and process one due job. Ok(None) means nothing was due.
    pub fn process_next(&self, now: EpochMillis) -> SimResult<Option<JobOutcome>> {
        match self.queue.claim(now)? {
            Some(job) => self.process(&job).map(Some),
            None => Ok(None),
        }
    }

    pub fn process(&self, job: &ClaimedJob) -> SimResult<JobOutcome> {
        let Some(sim) = self.store.get(&job.simulation_id)? else {
            let err = SimError::JobOrphaned {
                job_id:        job.id,
                simulation_id: job.simulation_id.clone(),
            };
            log::warn!("{err}; dropping job");
            self.queue.ack(job)?;
            return Ok(JobOutcome::Orphaned);
        };

        if sim.status == SimulationStatus::Completed {
            log::debug!("Job {} redelivered after simulation {} completed", job.id, sim.id);
            self.queue.ack(job)?;
            return Ok(JobOutcome::Skipped);
        }

        if let Err(e) = self.execute(&sim, job) {
            return match self.queue.fail(job, &e.to_string(), now_millis())? {
                FailOutcome::Retry { run_at } => Ok(JobOutcome::Retried { run_at }),
                FailOutcome::DeadLettered => Ok(JobOutcome::DeadLettered),
                FailOutcome::LeaseLost => Ok(JobOutcome::LeaseLost),
            };
        }

        // Only the current lease holder counts the record. Once acked the
        // job is gone even if the count write below fails.
        if !self.queue.ack(job)? {
            return Ok(JobOutcome::LeaseLost);
        }
        let live = self.progress.increment(&sim)?;

        if live >= sim.total_records {
            if self.progress.complete(&sim.id)? {
                log::info!("Simulation {} completed ({} records)", sim.id, sim.total_records);
            }
            return Ok(JobOutcome::SimulationCompleted);
        }
        Ok(JobOutcome::Processed { live })
    }

    /// Create the remote record, bounded by the per-job timeout.
    fn execute(&self, sim: &Simulation, job: &ClaimedJob) -> SimResult<String> {
        let failure = |reason: String| SimError::ExecutionFailure {
            simulation_id:  sim.id.clone(),
            sequence_index: job.sequence_index,
            reason,
        };

        let token = self
            .credentials
            .resolve(&sim.user_id)
            .map_err(|e| failure(format!("credential lookup failed: {e}")))?;
        let properties = record_properties(sim, job);
        let crm = Arc::clone(&self.crm);
        let object_type = self.settings.object_type.clone();

        // A timed-out call keeps running on its helper thread until the
        // client returns; the in-flight cap bounds how many can pile up.
        let slot = CallSlot::acquire(&self.in_flight, self.settings.call_limit)
            .ok_or_else(|| failure("too many CRM calls still in flight".into()))?;

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("crm-call-{}", job.id))
            .spawn(move || {
                let result = crm.create(&object_type, &properties, token.as_deref());
                drop(slot);
                let _ = tx.send(result);
            })
            .map_err(|e| failure(format!("cannot spawn CRM call: {e}")))?;

        match rx.recv_timeout(self.settings.job_timeout) {
            Ok(Ok(remote_id)) => {
                log::debug!(
                    "Simulation {} record {} created as {remote_id}",
                    sim.id, job.sequence_index
                );
                Ok(remote_id)
            }
            Ok(Err(e)) => Err(failure(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Err(failure(format!(
                "timed out after {} ms",
                self.settings.job_timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(failure("CRM call panicked".into())),
        }
    }

    /// How long an idle worker should sleep before polling again.
    fn idle_for(&self) -> Duration {
        let poll = self.settings.poll_interval;
        match self.queue.next_due_at() {
            Ok(Some(at)) => {
                let wait = at.saturating_sub(now_millis()).max(1) as u64;
                poll.min(Duration::from_millis(wait))
            }
            _ => poll,
        }
    }
}

/// One unit of the in-flight budget, released when dropped.
struct CallSlot(Arc<AtomicUsize>);

impl CallSlot {
    fn acquire(in_flight: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(in_flight)))
    }
}

impl Drop for CallSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn record_properties(sim: &Simulation, job: &ClaimedJob) -> RecordProperties {
    let mut props = RecordProperties::new();
    props.insert("simulation_id".into(), Value::from(sim.id.clone()));
    props.insert("sequence_index".into(), Value::from(job.sequence_index));
    props.insert("scenario".into(), Value::from(sim.scenario.clone()));
    props.insert("scheduled_at".into(), Value::from(job.run_at));
    props
}

/// A fixed set of threads running `Worker::process_next` in a loop.
pub struct WorkerPool {
    worker:  Arc<Worker>,
    stop:    Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(worker: Arc<Worker>, count: usize) -> SimResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(count);
        for n in 0..count {
            let name = format!("sim-worker-{n}");
            let worker = Arc::clone(&worker);
            let stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_loop(&name, &worker, &stop))
                .map_err(|e| SimError::Other(anyhow::anyhow!("cannot spawn worker: {e}")))?;
            handles.push(handle);
        }
        log::info!("Worker pool started with {count} worker(s)");
        Ok(Self { worker, stop, handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop claiming, let in-flight jobs finish, then flush progress.
    /// Returns how many simulations the final flush wrote.
    pub fn shutdown(self) -> SimResult<usize> {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("A worker thread panicked during shutdown");
            }
        }
        log::info!("Worker pool stopped");
        self.worker.progress().shutdown_flush()
    }
}

fn run_loop(name: &str, worker: &Worker, stop: &AtomicBool) {
    log::debug!("{name} running");
    while !stop.load(Ordering::Acquire) {
        match worker.process_next(now_millis()) {
            Ok(Some(outcome)) => log::trace!("{name}: {outcome:?}"),
            Ok(None) => thread::sleep(worker.idle_for()),
            Err(e) => {
                log::error!("{name}: {e}");
                thread::sleep(worker.settings.poll_interval);
            }
        }
    }
    log::debug!("{name} stopped");
}
