pub mod job_repo;
pub mod media_object_repo;
pub mod processing_log_repo;
pub mod slot_repo;
pub mod stats_repo;

pub use job_repo::{Admission, JobRepo};
pub use media_object_repo::MediaObjectRepo;
pub use processing_log_repo::ProcessingLogRepo;
pub use slot_repo::SlotRepo;
pub use stats_repo::StatsRepo;
