//! Engagement event ingestion: validation, idempotent recording and lead
//! funnel progression.

pub mod funnel;
pub mod ingestor;
pub mod log;

pub use funnel::{advance, stage_for};
pub use ingestor::{EventIngestor, IngestOutcome, IngestReceipt};
pub use log::EventLog;
