//! Shared per-transfer state
//!
//! Each registered torrent has one [`TransferState`] shared between the
//! actor, its download driver, seeding sessions and every handle. Progress
//! counters are atomics; piece bookkeeping sits behind a short-lived lock.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::{EngineError, TransferStatus};
use super::storage::PieceStorage;
use crate::descriptor::{InfoHash, PieceIndex, TorrentDescriptor};
use crate::protocol::PieceBitfield;

/// Registered transfers keyed by info hash.
pub type TransferRegistry = Arc<RwLock<HashMap<InfoHash, Arc<TransferState>>>>;

#[derive(Debug)]
struct PieceLedger {
    verified: Vec<bool>,
    in_flight: HashSet<u32>,
    last_progress: Instant,
}

/// Progress and completion signal of one transfer.
#[derive(Debug)]
pub struct TransferState {
    descriptor: TorrentDescriptor,
    storage: PieceStorage,
    bytes_completed: AtomicU64,
    uploaded: AtomicU64,
    ledger: Mutex<PieceLedger>,
    status: watch::Sender<TransferStatus>,
}

impl TransferState {
    /// Maps the descriptor onto `data_dir`, creates its zero-length files
    /// and counts pieces already on disk.
    ///
    /// # Errors
    /// - `EngineError::Storage` - A zero-length file could not be created
    pub async fn prepare(
        descriptor: TorrentDescriptor,
        data_dir: &Path,
    ) -> Result<Self, EngineError> {
        let storage = PieceStorage::new(data_dir, &descriptor);
        storage.create_empty_files().await?;
        let verified = storage.verify_existing(&descriptor).await;
        Ok(Self::with_verified(descriptor, storage, verified))
    }

    fn with_verified(
        descriptor: TorrentDescriptor,
        storage: PieceStorage,
        verified: Vec<bool>,
    ) -> Self {
        let bytes_completed: u64 = verified
            .iter()
            .enumerate()
            .filter(|(_, done)| **done)
            .map(|(index, _)| u64::from(descriptor.piece_size(PieceIndex::new(index as u32))))
            .sum();

        let initial = if bytes_completed == descriptor.total_length {
            TransferStatus::Complete
        } else {
            TransferStatus::Registered
        };

        tracing::debug!(
            info_hash = %descriptor.info_hash,
            verified = verified.iter().filter(|done| **done).count(),
            pieces = verified.len(),
            status = %initial,
            "Prepared transfer"
        );

        let (status, _) = watch::channel(initial);
        Self {
            descriptor,
            storage,
            bytes_completed: AtomicU64::new(bytes_completed),
            uploaded: AtomicU64::new(0),
            ledger: Mutex::new(PieceLedger {
                verified,
                in_flight: HashSet::new(),
                last_progress: Instant::now(),
            }),
            status,
        }
    }

    pub fn descriptor(&self) -> &TorrentDescriptor {
        &self.descriptor
    }

    pub fn info_hash(&self) -> InfoHash {
        self.descriptor.info_hash
    }

    pub fn storage(&self) -> &PieceStorage {
        &self.storage
    }

    pub fn total_length(&self) -> u64 {
        self.descriptor.total_length
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Acquire)
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn record_upload(&self, bytes: u64) {
        self.uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_left(&self) -> u64 {
        self.total_length().saturating_sub(self.bytes_completed())
    }

    pub fn status(&self) -> TransferStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferStatus> {
        self.status.subscribe()
    }

    /// Moves to `next` unless the transfer already reached a terminal status.
    ///
    /// Returns whether the status changed.
    pub fn transition(&self, next: TransferStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            tracing::debug!(
                info_hash = %self.descriptor.info_hash,
                from = %current,
                to = %next,
                "Transfer status changed"
            );
            *current = next;
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_completed() == self.total_length()
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.ledger
            .lock()
            .verified
            .get(index.as_u32() as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Verified pieces in wire format.
    pub fn bitfield(&self) -> PieceBitfield {
        let ledger = self.ledger.lock();
        let mut bitfield = PieceBitfield::new(ledger.verified.len() as u32);
        for (index, _) in ledger.verified.iter().enumerate().filter(|(_, done)| **done) {
            bitfield.set(PieceIndex::new(index as u32));
        }
        bitfield
    }

    /// Reserves a missing piece the peer has and nobody else is fetching.
    ///
    /// Lowest index first, so a file fills front to back.
    pub fn claim_piece(&self, peer_has: &PieceBitfield) -> Option<PieceIndex> {
        let mut ledger = self.ledger.lock();
        let index = (0..ledger.verified.len() as u32).find(|index| {
            !ledger.verified[*index as usize]
                && !ledger.in_flight.contains(index)
                && peer_has.has(PieceIndex::new(*index))
        })?;
        ledger.in_flight.insert(index);
        Some(PieceIndex::new(index))
    }

    /// Returns a claimed piece to the pool after a failed attempt.
    pub fn release_piece(&self, index: PieceIndex) {
        self.ledger.lock().in_flight.remove(&index.as_u32());
    }

    /// True when the peer has any piece still missing here.
    pub fn wants_from(&self, peer_has: &PieceBitfield) -> bool {
        let ledger = self.ledger.lock();
        ledger
            .verified
            .iter()
            .enumerate()
            .any(|(index, done)| !done && peer_has.has(PieceIndex::new(index as u32)))
    }

    /// Records a verified, written piece. Flips the status to complete once
    /// every byte is accounted for.
    pub fn complete_piece(&self, index: PieceIndex) {
        let newly_verified = {
            let mut ledger = self.ledger.lock();
            ledger.in_flight.remove(&index.as_u32());
            match ledger.verified.get_mut(index.as_u32() as usize) {
                Some(done) if !*done => {
                    *done = true;
                    ledger.last_progress = Instant::now();
                    true
                }
                _ => false,
            }
        };

        if !newly_verified {
            return;
        }

        let size = u64::from(self.descriptor.piece_size(index));
        let completed = self.bytes_completed.fetch_add(size, Ordering::AcqRel) + size;
        tracing::trace!(
            info_hash = %self.descriptor.info_hash,
            piece = %index,
            completed,
            total = self.total_length(),
            "Piece verified"
        );

        if completed == self.total_length() {
            self.transition(TransferStatus::Complete);
        }
    }

    /// Time since the last piece completed (or since registration).
    pub fn idle_for(&self) -> std::time::Duration {
        self.ledger.lock().last_progress.elapsed()
    }
}

/// Waits until every receiver reports a terminal status.
///
/// Returns `true` only if none ended [`TransferStatus::Stopped`]. A `closed`
/// signal that fires first ends the wait with `false`. With nothing to wait
/// for the answer is whether the engine is still open.
pub(crate) async fn wait_for_terminal(
    receivers: Vec<watch::Receiver<TransferStatus>>,
    mut closed: watch::Receiver<bool>,
) -> bool {
    if receivers.is_empty() {
        return !*closed.borrow();
    }

    let statuses = futures::future::join_all(receivers.into_iter().map(terminal_status));
    tokio::select! {
        biased;
        statuses = statuses => statuses.iter().all(|status| *status != TransferStatus::Stopped),
        _ = closed.wait_for(|closed| *closed) => false,
    }
}

async fn terminal_status(mut receiver: watch::Receiver<TransferStatus>) -> TransferStatus {
    match receiver.wait_for(|status| status.is_terminal()).await {
        Ok(status) => *status,
        Err(_) => TransferStatus::Stopped,
    }
}
