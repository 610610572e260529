//! Campaign-level operations: setup, generation, sending, review, and status.

pub mod generation;
pub mod review;
pub mod sending;
pub mod setup;
pub mod summary;

pub use generation::{GenerationEngine, GenerationRequest};
pub use review::{ReviewEdit, review_edit};
pub use sending::{Dispatcher, SendFailure, SendReport};
pub use setup::{ContactRow, SetupRequest, setup_campaign};
pub use summary::{CampaignSummary, campaign_summary};
