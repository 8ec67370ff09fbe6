//! Download failure taxonomy

use std::fmt;

use crate::descriptor::DescriptorError;
use crate::engine::EngineError;

/// Why a started transfer did not end with every byte on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    /// Engine reported all transfers finished but bytes are missing.
    EngineGaveUp,
    /// Engine stopped or closed while we were waiting.
    EngineStopped,
    /// Completion deadline elapsed.
    DeadlineElapsed,
    /// Caller cancelled the wait.
    Cancelled,
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EngineGaveUp => "engine gave up",
            Self::EngineStopped => "engine stopped",
            Self::DeadlineElapsed => "deadline elapsed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Coarse classification of [`FetchError`], stable for matching and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    EngineConstructionFailed,
    DescriptorFetchFailed,
    NonSuccessStatus,
    MalformedDescriptor,
    RegistrationFailed,
    IncompleteTransfer,
}

/// Errors from [`super::DownloadOrchestrator::download_file`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to start engine for {url}")]
    EngineConstructionFailed {
        url: String,
        #[source]
        source: EngineError,
    },

    #[error("Failed to fetch descriptor from {url}")]
    DescriptorFetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Descriptor request to {url} returned HTTP {status}")]
    NonSuccessStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Malformed descriptor at {url}")]
    MalformedDescriptor {
        url: String,
        #[source]
        source: DescriptorError,
    },

    #[error("Failed to register torrent from {url}")]
    RegistrationFailed {
        url: String,
        #[source]
        source: EngineError,
    },

    #[error("Transfer from {url} incomplete ({reason}): {completed} of {total} bytes")]
    IncompleteTransfer {
        url: String,
        reason: IncompleteReason,
        completed: u64,
        total: u64,
    },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::EngineConstructionFailed { .. } => FetchErrorKind::EngineConstructionFailed,
            Self::DescriptorFetchFailed { .. } => FetchErrorKind::DescriptorFetchFailed,
            Self::NonSuccessStatus { .. } => FetchErrorKind::NonSuccessStatus,
            Self::MalformedDescriptor { .. } => FetchErrorKind::MalformedDescriptor,
            Self::RegistrationFailed { .. } => FetchErrorKind::RegistrationFailed,
            Self::IncompleteTransfer { .. } => FetchErrorKind::IncompleteTransfer,
        }
    }

    /// URL of the descriptor the failed invocation was given.
    pub fn url(&self) -> &str {
        match self {
            Self::EngineConstructionFailed { url, .. }
            | Self::DescriptorFetchFailed { url, .. }
            | Self::NonSuccessStatus { url, .. }
            | Self::MalformedDescriptor { url, .. }
            | Self::RegistrationFailed { url, .. }
            | Self::IncompleteTransfer { url, .. } => url,
        }
    }

    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::EngineConstructionFailed { source, .. } => match source {
                EngineError::Bind { addr, .. } => {
                    format!("Could not listen on {addr}, is another client running?")
                }
                other => format!("Could not start the torrent engine: {other}"),
            },
            Self::DescriptorFetchFailed { url, .. } => {
                format!("Could not download the torrent file from {url}")
            }
            Self::NonSuccessStatus { url, status } => {
                format!("Server answered {status} for {url}")
            }
            Self::MalformedDescriptor { source, .. } => {
                format!("The torrent file is not valid: {source}")
            }
            Self::RegistrationFailed { source, .. } => {
                format!("The engine refused the torrent: {source}")
            }
            Self::IncompleteTransfer {
                reason,
                completed,
                total,
                ..
            } => format!("Download incomplete ({reason}): got {completed} of {total} bytes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_incomplete_message_reports_progress() {
        let err = FetchError::IncompleteTransfer {
            url: "http://example.test/a.torrent".to_string(),
            reason: IncompleteReason::DeadlineElapsed,
            completed: 3,
            total: 18,
        };
        assert_eq!(err.kind(), FetchErrorKind::IncompleteTransfer);
        assert!(err.to_string().contains("3 of 18 bytes"));
        assert!(err.user_message().contains("deadline elapsed"));
        assert_eq!(err.url(), "http://example.test/a.torrent");
    }

    #[test]
    fn test_source_chain_is_preserved() {
        let err = FetchError::MalformedDescriptor {
            url: "http://example.test/bad.torrent".to_string(),
            source: DescriptorError::Invalid {
                reason: "missing info".to_string(),
            },
        };
        let source = err.source().map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("Invalid torrent descriptor: missing info")
        );
    }

    #[test]
    fn test_bind_failure_message_names_address() {
        let err = FetchError::EngineConstructionFailed {
            url: "http://example.test/a.torrent".to_string(),
            source: EngineError::Bind {
                addr: "[::]:6881".parse().unwrap(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            },
        };
        assert!(err.user_message().contains("[::]:6881"));
    }
}
