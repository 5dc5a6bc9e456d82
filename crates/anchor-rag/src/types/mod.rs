//! Domain types shared across the crate

pub mod chunk;
pub mod job;
pub mod response;
pub mod upload;

pub use chunk::{ChunkKind, ChunkMeta, ChunkRecord};
pub use job::{JobError, JobMetrics, JobOptions, JobProgress, JobSnapshot, JobStatus, JobSummary};
pub use response::{AnswerMode, ChatResponse, DecisionExplain, SourcesUsed, UsedChunk};
pub use upload::UploadRecord;
