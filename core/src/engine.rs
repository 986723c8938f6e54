//! Engine wiring — builds every component from one config and one
//! database, with collaborators injected by the caller.
//!
//! The process entry point owns the Engine: it opens the database,
//! starts the worker pool, serves the API and shuts everything down.

use crate::{
    api::Api,
    config::EngineConfig,
    crm::{CredentialResolver, CrmClient, StaticCredentials},
    error::SimResult,
    progress::ProgressAggregator,
    scheduler::Scheduler,
    store::{Database, JobQueue, SimStore},
    worker::{Worker, WorkerPool, WorkerSettings},
};
use std::sync::Arc;

pub struct Engine {
    pub config:    EngineConfig,
    pub store:     SimStore,
    pub queue:     JobQueue,
    pub scheduler: Arc<Scheduler>,
    pub progress:  Arc<ProgressAggregator>,
    pub worker:    Arc<Worker>,
}

impl Engine {
    /// Wire the engine on an already-migrated database.
    pub fn build(
        config: EngineConfig,
        db: Database,
        crm: Arc<dyn CrmClient>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> SimResult<Self> {
        config.validate()?;
        let store = SimStore::new(db.clone());
        let queue = JobQueue::new(db, config.retry_policy(), config.lease_ms);
        let scheduler = Arc::new(Scheduler::new(store.clone(), queue.clone())?);
        let progress = Arc::new(ProgressAggregator::from_config(store.clone(), &config));
        let worker = Arc::new(Worker::new(
            store.clone(),
            queue.clone(),
            Arc::clone(&progress),
            crm,
            credentials,
            WorkerSettings::from_config(&config),
        ));
        Ok(Self { config, store, queue, scheduler, progress, worker })
    }

    /// In-memory engine with test timings.
    pub fn build_test(config: EngineConfig, crm: Arc<dyn CrmClient>) -> SimResult<Self> {
        let db = Database::in_memory()?;
        db.migrate()?;
        Self::build(config, db, crm, Arc::new(StaticCredentials::new()))
    }

    /// Finish simulations left at their total by an earlier run, then
    /// start the pool.
    pub fn start_workers(&self) -> SimResult<WorkerPool> {
        let completed = self.progress.complete_finished()?;
        if completed > 0 {
            log::info!("Completed {completed} simulation(s) left at their total");
        }
        WorkerPool::start(Arc::clone(&self.worker), self.config.worker_count)
    }

    pub fn api(&self) -> Api {
        Api::new(Arc::clone(&self.scheduler), self.config.list_limit)
    }
}
