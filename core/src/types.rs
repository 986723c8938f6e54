//! Shared primitive types used across the engine.

/// Milliseconds since the Unix epoch. All schedule and bookkeeping
/// timestamps use this unit.
pub type EpochMillis = i64;

/// Opaque simulation identifier (a v4 UUID rendered as a string).
pub type SimulationId = String;

/// Opaque owner reference supplied by the caller.
pub type UserId = String;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}
