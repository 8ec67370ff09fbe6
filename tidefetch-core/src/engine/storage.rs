//! Piece storage over the descriptor's files
//!
//! Torrent content is one contiguous byte range split across files. Pieces
//! are mapped onto file spans so a piece that straddles a file boundary is
//! read and written in several parts.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::EngineError;
use crate::descriptor::{PieceIndex, TorrentDescriptor};

#[derive(Debug, Clone)]
struct FileSpan {
    path: PathBuf,
    /// Offset of the file's first byte within the torrent
    start: u64,
    length: u64,
}

/// Reads and writes torrent bytes under a data directory.
#[derive(Debug, Clone)]
pub struct PieceStorage {
    files: Vec<FileSpan>,
    piece_length: u64,
    total_length: u64,
}

impl PieceStorage {
    pub fn new(data_dir: &Path, descriptor: &TorrentDescriptor) -> Self {
        let mut start = 0u64;
        let files = descriptor
            .files
            .iter()
            .map(|file| {
                let span = FileSpan {
                    path: data_dir.join(descriptor.relative_path(file)),
                    start,
                    length: file.length,
                };
                start += file.length;
                span
            })
            .collect();

        Self {
            files,
            piece_length: u64::from(descriptor.piece_length),
            total_length: descriptor.total_length,
        }
    }

    fn piece_range(&self, index: PieceIndex) -> (u64, u64) {
        let start = u64::from(index.as_u32()) * self.piece_length;
        let length = self.piece_length.min(self.total_length.saturating_sub(start));
        (start, length)
    }

    /// File segments covering `[offset, offset + length)` as
    /// `(span, offset_in_file, segment_length)`.
    fn segments(&self, offset: u64, length: u64) -> impl Iterator<Item = (&FileSpan, u64, u64)> {
        let end = offset + length;
        self.files.iter().filter_map(move |span| {
            let span_end = span.start + span.length;
            let from = offset.max(span.start);
            let to = end.min(span_end);
            (from < to).then(|| (span, from - span.start, to - from))
        })
    }

    /// Reads `length` bytes starting at torrent offset `offset`.
    ///
    /// # Errors
    /// - `EngineError::Storage` - A backing file is missing or too short
    pub async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        let mut data = Vec::with_capacity(length as usize);
        for (span, file_offset, segment_length) in self.segments(offset, length) {
            let storage_error = |source| EngineError::Storage {
                path: span.path.clone(),
                source,
            };
            let mut file = fs::File::open(&span.path).await.map_err(storage_error)?;
            file.seek(SeekFrom::Start(file_offset))
                .await
                .map_err(storage_error)?;

            let start = data.len();
            data.resize(start + segment_length as usize, 0);
            file.read_exact(&mut data[start..])
                .await
                .map_err(storage_error)?;
        }
        Ok(data)
    }

    /// Writes `data` at torrent offset `offset`, creating files as needed.
    ///
    /// # Errors
    /// - `EngineError::Storage` - Directory or file could not be written
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<(), EngineError> {
        let mut consumed = 0usize;
        for (span, file_offset, segment_length) in self.segments(offset, data.len() as u64) {
            let storage_error = |source| EngineError::Storage {
                path: span.path.clone(),
                source,
            };
            if let Some(parent) = span.path.parent() {
                fs::create_dir_all(parent).await.map_err(storage_error)?;
            }

            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&span.path)
                .await
                .map_err(storage_error)?;
            file.seek(SeekFrom::Start(file_offset))
                .await
                .map_err(storage_error)?;

            let segment = &data[consumed..consumed + segment_length as usize];
            file.write_all(segment).await.map_err(storage_error)?;
            file.flush().await.map_err(storage_error)?;
            consumed += segment.len();
        }
        Ok(())
    }

    /// # Errors
    /// - `EngineError::Storage` - Piece bytes are not on disk
    pub async fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, EngineError> {
        let (start, length) = self.piece_range(index);
        self.read(start, length).await
    }

    /// # Errors
    /// - `EngineError::Storage` - Piece could not be written
    pub async fn write_piece(&self, index: PieceIndex, data: &[u8]) -> Result<(), EngineError> {
        let (start, _) = self.piece_range(index);
        self.write(start, data).await
    }

    /// Hash-checks whatever is already on disk.
    ///
    /// Missing or short files simply leave their pieces unverified.
    pub async fn verify_existing(&self, descriptor: &TorrentDescriptor) -> Vec<bool> {
        let mut verified = Vec::with_capacity(descriptor.piece_hashes.len());
        for (index, expected) in descriptor.piece_hashes.iter().enumerate() {
            let ok = match self.read_piece(PieceIndex::new(index as u32)).await {
                Ok(data) => Sha1::digest(&data).as_slice() == expected,
                Err(_) => false,
            };
            verified.push(ok);
        }
        verified
    }

    /// Creates zero-length files, which no piece write ever touches.
    ///
    /// # Errors
    /// - `EngineError::Storage` - File could not be created
    pub async fn create_empty_files(&self) -> Result<(), EngineError> {
        for span in self.files.iter().filter(|span| span.length == 0) {
            let storage_error = |source| EngineError::Storage {
                path: span.path.clone(),
                source,
            };
            if let Some(parent) = span.path.parent() {
                fs::create_dir_all(parent).await.map_err(storage_error)?;
            }
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&span.path)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }
}
