//! Single-file download orchestration
//!
//! One invocation owns one engine from construction to close. The engine is
//! closed on every path after it was constructed, and the terminal state is
//! recorded only after that.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;

use super::error::{FetchError, IncompleteReason};
use super::state::{DownloadState, StateTracker};
use crate::config::FetchConfig;
use crate::descriptor::{DescriptorError, InfoHash, TorrentDescriptor};
use crate::engine::{EngineConfig, EngineError, EngineFactory, TorrentEngine, TransferHandle};
use crate::network::NetworkIdentity;

/// Result of a verified download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub info_hash: InfoHash,
    pub name: String,
    /// Files written, under the destination directory
    pub files: Vec<PathBuf>,
    pub total_length: u64,
    pub listen_port: u16,
    pub elapsed: Duration,
}

enum WaitOutcome {
    Finished(bool),
    DeadlineElapsed,
    Cancelled,
}

/// Drives one engine per `download_file` call.
pub struct DownloadOrchestrator<F: EngineFactory> {
    factory: F,
    config: FetchConfig,
    log_sink: Option<Dispatch>,
}

impl<F: EngineFactory> DownloadOrchestrator<F> {
    pub fn new(factory: F, config: FetchConfig) -> Self {
        Self {
            factory,
            config,
            log_sink: None,
        }
    }

    /// Routes everything this orchestrator and its engines log to `sink`
    /// instead of the global subscriber.
    pub fn with_log_sink(mut self, sink: Dispatch) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Downloads the torrent described at `url` into `destination`.
    ///
    /// # Errors
    ///
    /// - `FetchError::EngineConstructionFailed` - Engine could not start
    /// - `FetchError::DescriptorFetchFailed` - HTTP request failed
    /// - `FetchError::NonSuccessStatus` - Server answered anything but 200
    /// - `FetchError::MalformedDescriptor` - Body is not a valid descriptor
    /// - `FetchError::RegistrationFailed` - Engine refused the torrent
    /// - `FetchError::IncompleteTransfer` - Wait ended without every byte
    pub async fn download_file(
        &self,
        destination: &Path,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<CompletedTransfer, FetchError> {
        self.download_file_until(destination, client, url, std::future::pending())
            .await
    }

    /// Like [`Self::download_file`], but the completion wait also ends when
    /// `cancel` resolves.
    ///
    /// # Errors
    ///
    /// As [`Self::download_file`]; cancellation yields
    /// `IncompleteTransfer { reason: Cancelled, .. }`.
    pub async fn download_file_until<C>(
        &self,
        destination: &Path,
        client: &reqwest::Client,
        url: &str,
        cancel: C,
    ) -> Result<CompletedTransfer, FetchError>
    where
        C: Future<Output = ()>,
    {
        let run = self.run(destination, client, url, cancel);
        match &self.log_sink {
            Some(sink) => run.with_subscriber(sink.clone()).await,
            None => run.await,
        }
    }

    async fn run<C>(
        &self,
        destination: &Path,
        client: &reqwest::Client,
        url: &str,
        cancel: C,
    ) -> Result<CompletedTransfer, FetchError>
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut state = StateTracker::new();
        tracing::info!(url, destination = %destination.display(), "Starting download");

        state.advance(DownloadState::EngineStarting);
        let engine = match self.factory.construct(self.engine_config(destination)).await {
            Ok(engine) => engine,
            Err(source) => {
                tracing::error!(url, error = %source, "Failed to construct engine");
                state.advance(DownloadState::Failed);
                return Err(FetchError::EngineConstructionFailed {
                    url: url.to_string(),
                    source,
                });
            }
        };
        tracing::debug!(url, listen_port = engine.local_port(), "Engine started");

        let result = self
            .drive(&engine, &mut state, destination, client, url, cancel)
            .await;

        engine.close().await;

        match &result {
            Ok(completed) => {
                state.advance(DownloadState::Done);
                tracing::info!(
                    url,
                    info_hash = %completed.info_hash,
                    bytes = completed.total_length,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Download complete"
                );
            }
            Err(e) => {
                let failed_in = state.current();
                state.advance(DownloadState::Failed);
                tracing::warn!(url, state = %failed_in, error = %e, "Download failed");
            }
        }
        tracing::debug!(url, states = ?state.history(), "Download finished");

        result.map(|completed| CompletedTransfer {
            elapsed: started.elapsed(),
            ..completed
        })
    }

    fn engine_config(&self, destination: &Path) -> EngineConfig {
        let network = &self.config.network;
        let identity = NetworkIdentity::resolve(network.port_selection, network.listen_address);
        let mut config =
            EngineConfig::configure(destination, identity, self.config.download.debug_engine)
                .with_network(network);
        config.give_up_after = self.config.download.engine_give_up_after;
        config
    }

    async fn drive<C>(
        &self,
        engine: &F::Engine,
        state: &mut StateTracker,
        destination: &Path,
        client: &reqwest::Client,
        url: &str,
        cancel: C,
    ) -> Result<CompletedTransfer, FetchError>
    where
        C: Future<Output = ()>,
    {
        state.advance(DownloadState::FetchingDescriptor);
        let body = fetch_descriptor(client, url, self.config.download.max_descriptor_bytes).await?;
        let descriptor =
            TorrentDescriptor::from_bytes(&body).map_err(|source| FetchError::MalformedDescriptor {
                url: url.to_string(),
                source,
            })?;
        tracing::info!(
            url,
            info_hash = %descriptor.info_hash,
            name = %descriptor.name,
            total = descriptor.total_length,
            pieces = descriptor.piece_count(),
            "Fetched descriptor"
        );

        let info_hash = descriptor.info_hash;
        let name = descriptor.name.clone();
        let files = descriptor
            .files
            .iter()
            .map(|file| destination.join(descriptor.relative_path(file)))
            .collect();

        state.advance(DownloadState::Registering);
        let registration_failed = |source: EngineError| {
            tracing::error!(url, %info_hash, error = %source, "Failed to add torrent");
            FetchError::RegistrationFailed {
                url: url.to_string(),
                source,
            }
        };
        let handle = engine
            .register_torrent(descriptor)
            .await
            .map_err(registration_failed)?;
        handle
            .request_full_download()
            .await
            .map_err(registration_failed)?;

        state.advance(DownloadState::Downloading);
        let outcome = self.wait(engine, cancel).await;

        state.advance(DownloadState::Verifying);
        let total = handle.total_length();
        let completed = handle.bytes_completed();
        let reason = match outcome {
            WaitOutcome::Finished(true) if completed == total => {
                return Ok(CompletedTransfer {
                    info_hash,
                    name,
                    files,
                    total_length: total,
                    listen_port: engine.local_port(),
                    elapsed: Duration::ZERO,
                });
            }
            WaitOutcome::Finished(true) => IncompleteReason::EngineGaveUp,
            WaitOutcome::Finished(false) => IncompleteReason::EngineStopped,
            WaitOutcome::DeadlineElapsed => IncompleteReason::DeadlineElapsed,
            WaitOutcome::Cancelled => IncompleteReason::Cancelled,
        };

        Err(FetchError::IncompleteTransfer {
            url: url.to_string(),
            reason,
            completed,
            total,
        })
    }

    async fn wait<C>(&self, engine: &F::Engine, cancel: C) -> WaitOutcome
    where
        C: Future<Output = ()>,
    {
        let deadline = self.config.download.completion_deadline;
        let expired = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            all = engine.wait_all_complete() => WaitOutcome::Finished(all),
            () = expired => {
                tracing::warn!(deadline = ?deadline, "Completion deadline elapsed");
                WaitOutcome::DeadlineElapsed
            }
            () = cancel => {
                tracing::info!("Download cancelled");
                WaitOutcome::Cancelled
            }
        }
    }
}

/// GETs the descriptor body, refusing non-200 answers and oversized bodies.
async fn fetch_descriptor(
    client: &reqwest::Client,
    url: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, FetchError> {
    let fetch_failed = |source| FetchError::DescriptorFetchFailed {
        url: url.to_string(),
        source,
    };
    let too_large = |size: u64| FetchError::MalformedDescriptor {
        url: url.to_string(),
        source: DescriptorError::TooLarge {
            size,
            limit: max_bytes,
        },
    };

    let mut response = client.get(url).send().await.map_err(fetch_failed)?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::NonSuccessStatus {
            url: url.to_string(),
            status,
        });
    }
    if let Some(length) = response.content_length().filter(|length| *length > max_bytes) {
        return Err(too_large(length));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(fetch_failed)? {
        let size = (body.len() + chunk.len()) as u64;
        if size > max_bytes {
            return Err(too_large(size));
        }
        body.extend_from_slice(&chunk);
    }

    tracing::debug!(url, bytes = body.len(), "Descriptor body received");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockBehaviour, MockEngineFactory};
    use crate::network::PortSelection;

    #[test]
    fn test_engine_config_carries_download_settings() {
        let mut config = FetchConfig::for_testing();
        config.network.port_selection = PortSelection::Fixed(7777);
        config.download.debug_engine = true;
        config.download.engine_give_up_after = Some(Duration::from_secs(9));

        let orchestrator =
            DownloadOrchestrator::new(MockEngineFactory::new(MockBehaviour::default()), config);
        let engine_config = orchestrator.engine_config(Path::new("/tmp/dest"));

        assert_eq!(engine_config.data_dir, PathBuf::from("/tmp/dest"));
        assert_eq!(engine_config.identity.listen_port, 7777);
        assert_eq!(
            engine_config.identity.listen_address,
            "127.0.0.1".parse::<std::net::IpAddr>().unwrap()
        );
        assert!(engine_config.debug);
        assert_eq!(engine_config.give_up_after, Some(Duration::from_secs(9)));
        assert_eq!(
            engine_config.rediscover_interval,
            Duration::from_millis(200)
        );
    }
}
