//! Job pipeline of the ingest gateway.
//!
//! Ingest admits a job into the [`queue::JobQueue`]; [`worker::QueueWorker`]s
//! claim jobs, drive the slot's provider until the job's deadline and
//! finalize them; [`stats::StatsCache`] records one audit entry per
//! transition; [`cleanup::CleanupSweeper`] removes expired media.

pub mod cleanup;
pub mod context;
pub mod error;
pub mod ingest;
pub mod media;
pub mod queue;
pub mod slots;
pub mod stats;
pub mod templates;
pub mod worker;

pub use cleanup::{CleanupReport, CleanupSweeper};
pub use context::PipelineContext;
pub use error::{
    CleanupError, IngestError, MediaError, QueueError, SlotError, StatsError, TemplateError,
    WorkerError,
};
pub use ingest::{IngestConfig, IngestGateway, IngestOutcome, Upload};
pub use media::{FsMediaStore, MediaStore, MemoryMediaStore};
pub use queue::{JobQueue, MemoryJobQueue, PgJobQueue};
pub use slots::{PgSlotDirectory, SlotDirectory, StaticSlotDirectory};
pub use stats::{MemoryJournal, MemoryStatsStore, PgStatsStore, StatsCache, StatsCacheConfig, StatsStore};
pub use worker::{QueueWorker, RunOutcome, WorkerConfig};
