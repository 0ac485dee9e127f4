pub mod job;
pub mod media_object;
pub mod processing_log;
pub mod slot;
pub mod stats_aggregate;
pub mod status;
