//! Per-invocation download state machine

use std::fmt;

/// Phase of one `download_file` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    EngineStarting,
    FetchingDescriptor,
    Registering,
    Downloading,
    Verifying,
    Done,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Forward moves follow the pipeline; any live state may fail; only
    /// `Verifying` reaches `Done`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use DownloadState::*;

        match (self, next) {
            (Idle, EngineStarting)
            | (EngineStarting, FetchingDescriptor)
            | (FetchingDescriptor, Registering)
            | (Registering, Downloading)
            | (Downloading, Verifying)
            | (Verifying, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::EngineStarting => "engine-starting",
            Self::FetchingDescriptor => "fetching-descriptor",
            Self::Registering => "registering",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Tracks and logs the state of one invocation.
#[derive(Debug)]
pub(crate) struct StateTracker {
    state: DownloadState,
    history: Vec<DownloadState>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: DownloadState::Idle,
            history: vec![DownloadState::Idle],
        }
    }

    pub(crate) fn current(&self) -> DownloadState {
        self.state
    }

    pub(crate) fn history(&self) -> &[DownloadState] {
        &self.history
    }

    /// Moves to `next`; invalid moves are logged and ignored.
    pub(crate) fn advance(&mut self, next: DownloadState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Ignoring invalid download state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Download state changed");
        self.state = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_reaches_done() {
        let mut tracker = StateTracker::new();
        for next in [
            DownloadState::EngineStarting,
            DownloadState::FetchingDescriptor,
            DownloadState::Registering,
            DownloadState::Downloading,
            DownloadState::Verifying,
            DownloadState::Done,
        ] {
            tracker.advance(next);
        }
        assert_eq!(tracker.current(), DownloadState::Done);
        assert_eq!(tracker.history().len(), 7);
    }

    #[test]
    fn test_only_verifying_reaches_done() {
        assert!(!DownloadState::Downloading.can_transition_to(DownloadState::Done));
        assert!(!DownloadState::Idle.can_transition_to(DownloadState::Done));
        assert!(DownloadState::Verifying.can_transition_to(DownloadState::Done));
    }

    #[test]
    fn test_every_live_state_may_fail() {
        for state in [
            DownloadState::Idle,
            DownloadState::EngineStarting,
            DownloadState::FetchingDescriptor,
            DownloadState::Registering,
            DownloadState::Downloading,
            DownloadState::Verifying,
        ] {
            assert!(state.can_transition_to(DownloadState::Failed), "{state}");
        }
        assert!(!DownloadState::Done.can_transition_to(DownloadState::Failed));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut tracker = StateTracker::new();
        tracker.advance(DownloadState::EngineStarting);
        tracker.advance(DownloadState::Failed);
        tracker.advance(DownloadState::FetchingDescriptor);
        assert_eq!(tracker.current(), DownloadState::Failed);
    }
}
