//! Outreach Assist: email sequences with LLM-written content and reply automation.

pub mod api;
pub mod compose;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod outreach;
pub mod pipeline;
pub mod store;
