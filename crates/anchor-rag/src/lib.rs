//! anchor-rag: retrieval-augmented QA backend
//!
//! Three coupled subsystems: a retrieval and mode-decision engine over an
//! alias-swapped vector index, an ingestion pipeline that stages uploads,
//! cleans, sanitizes, chunks, embeds and upserts into versioned physical
//! indexes, and a pattern-driven PII sanitiser shared by both.

pub mod config;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod retrieval;
pub mod sanitize;
pub mod server;
pub mod store;
pub mod types;
pub mod uploads;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use retrieval::RetrievalService;
pub use server::Server;
