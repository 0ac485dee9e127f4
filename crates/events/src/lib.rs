//! In-process job event bus.
//!
//! The worker publishes one terminal event per finalized job; the ingest
//! gateway subscribes to answer synchronous callers.

pub mod bus;

pub use bus::{EventBus, JobEvent};
