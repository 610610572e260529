//! Persistence layer: libSQL-backed storage for campaigns, emails, and events.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{CampaignSetup, Database, EmailPatch};
