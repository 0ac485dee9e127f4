//! Background services of the ingest gateway: queue workers, the expiry
//! reaper and the media cleanup sweeper.

pub mod config;
pub mod runtime;
