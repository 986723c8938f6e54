//! Simulation scheduling and progress engine for synthetic CRM data.
//!
//! A simulation asks for N records spread over a time window. The
//! scheduler expands the window into per-record timestamps, enqueues one
//! delayed job per record, and workers create the records and count
//! progress until the simulation completes.

pub mod api;
pub mod config;
pub mod crm;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod progress;
pub mod rng;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod types;
pub mod worker;
