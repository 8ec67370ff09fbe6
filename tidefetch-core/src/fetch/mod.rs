//! Download orchestration: descriptor acquisition, engine lifecycle and
//! completion verification for one torrent per invocation.

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::{FetchError, FetchErrorKind, IncompleteReason};
pub use orchestrator::{CompletedTransfer, DownloadOrchestrator};
pub use state::DownloadState;
