//! HTTP tracker announce (BEP 3, compact peers per BEP 23)

pub mod client;
pub mod types;

pub use client::HttpTrackerClient;
pub use types::{AnnounceEvent, AnnounceRequest, AnnounceResponse};
