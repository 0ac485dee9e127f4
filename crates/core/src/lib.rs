//! Pure domain logic for the PhotoChanger ingest gateway.
//!
//! Nothing in this crate performs I/O. It holds the canonical timestamp
//! type, the deadline arithmetic every other crate relies on, the
//! statistics window rules and upload validation.

pub mod backoff;
pub mod checksum;
pub mod clock;
pub mod deadlines;
pub mod error;
pub mod ingest;
pub mod job_events;
pub mod stats;
pub mod types;
