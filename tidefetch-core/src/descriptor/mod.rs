//! Torrent descriptor (.torrent metainfo) model, parsing and creation.
//!
//! Metadata extraction uses bencode-rs for decoding; the info-hash is computed
//! over the exact byte span of the `info` dictionary so it matches what every
//! other client announces.

pub mod bencode;
pub mod creation;
pub mod encode;

use std::fmt;
use std::path::PathBuf;

pub use bencode::DescriptorParser;
pub use creation::{CreatedDescriptor, DEFAULT_PIECE_LENGTH, DescriptorCreator};
pub use encode::BencodeValue;
use serde::Serialize;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used to uniquely identify torrents across the BitTorrent network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    /// - `DescriptorError::InvalidInfoHash` - Not hex, or not exactly 20 bytes
    pub fn from_hex(value: &str) -> Result<Self, DescriptorError> {
        let bytes = hex::decode(value).map_err(|_| DescriptorError::InvalidInfoHash {
            value: value.to_string(),
        })?;
        let hash: [u8; 20] =
            bytes
                .try_into()
                .map_err(|_| DescriptorError::InvalidInfoHash {
                    value: value.to_string(),
                })?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Individual file within a torrent.
///
/// For multi-file torrents `path` is relative to the torrent's root directory;
/// for single-file torrents it holds just the torrent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

/// Parsed representation of a `.torrent` file.
///
/// Owned by the caller between fetch and registration; registration moves it
/// into the engine, which becomes the only writer of progress derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentDescriptor {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<TorrentFile>,
    pub announce_urls: Vec<String>,
    /// True when the info dictionary used the `files` list form.
    pub multi_file: bool,
}

impl TorrentDescriptor {
    /// Parses bencoded metainfo bytes.
    ///
    /// # Errors
    /// - `DescriptorError::Bencode` - Body is not valid bencode
    /// - `DescriptorError::Invalid` - Required fields missing or inconsistent
    /// - `DescriptorError::UnsafePath` - A file path escapes the data directory
    pub fn from_bytes(torrent_bytes: &[u8]) -> Result<Self, DescriptorError> {
        DescriptorParser::parse(torrent_bytes)
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Length of the given piece; the last piece may be shorter.
    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        let start = u64::from(index.as_u32()) * u64::from(self.piece_length);
        let remaining = self.total_length.saturating_sub(start);
        remaining.min(u64::from(self.piece_length)) as u32
    }

    /// Path of a file relative to the engine's data directory.
    pub fn relative_path(&self, file: &TorrentFile) -> PathBuf {
        let mut path = PathBuf::new();
        if self.multi_file {
            path.push(&self.name);
        }
        for component in &file.path {
            path.push(component);
        }
        path
    }

    /// Serializable overview used by the CLI `inspect` command.
    pub fn summary(&self) -> DescriptorSummary {
        DescriptorSummary {
            info_hash: self.info_hash.to_string(),
            name: self.name.clone(),
            num_files: self.files.len(),
            num_pieces: self.piece_hashes.len(),
            piece_length: self.piece_length,
            total_length: self.total_length,
            announce_urls: self.announce_urls.clone(),
            files: self
                .files
                .iter()
                .map(|file| FileSummary {
                    path: self.relative_path(file).display().to_string(),
                    length: file.length,
                })
                .collect(),
        }
    }
}

/// Flat view of a descriptor for display and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSummary {
    pub info_hash: String,
    pub name: String,
    pub num_files: usize,
    pub num_pieces: usize,
    pub piece_length: u32,
    pub total_length: u64,
    pub announce_urls: Vec<String>,
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub length: u64,
}

/// Errors that can occur while decoding or creating descriptors.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Bencode parsing failed: {reason}")]
    Bencode { reason: String },

    #[error("Invalid torrent descriptor: {reason}")]
    Invalid { reason: String },

    #[error("Unsafe file path in descriptor: {path}")]
    UnsafePath { path: String },

    #[error("Descriptor of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Invalid info hash: {value}")]
    InvalidInfoHash { value: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
