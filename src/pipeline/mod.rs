//! Inbound webhook pipelines.
//!
//! Two inbound flows feed the store:
//! 1. `EventIngestor::ingest()` applies provider delivery/engagement batches
//! 2. `ReplyPipeline::handle()` classifies an inbound reply, drafts an answer,
//!    and sends it only when the reply is simple

pub mod events;
pub mod reply;
pub mod types;

pub use events::EventIngestor;
pub use reply::ReplyPipeline;
pub use types::{InboundReply, IngestReport, ReplyOutcome};
