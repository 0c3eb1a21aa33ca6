//! sea-orm models for the lead workflow.

pub mod activity;
pub mod lead;
pub mod pipeline;
pub mod stage;
pub mod user;
