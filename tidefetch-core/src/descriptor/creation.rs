//! Descriptor creation from local files
//!
//! Splits a file into pieces, hashes each with SHA-1 and emits the bencoded
//! metainfo alongside the parsed descriptor.

use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::encode::BencodeValue;
use super::{DescriptorError, InfoHash, TorrentDescriptor, TorrentFile};

/// Standard BitTorrent piece length (256KB)
pub const DEFAULT_PIECE_LENGTH: u32 = 262_144; // 256 * 1024

/// Descriptor plus the exact bytes that would be written to a `.torrent` file.
#[derive(Debug, Clone)]
pub struct CreatedDescriptor {
    pub descriptor: TorrentDescriptor,
    pub bytes: Vec<u8>,
}

/// Builds single-file descriptors.
pub struct DescriptorCreator {
    piece_length: u32,
}

impl Default for DescriptorCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorCreator {
    /// Creates a creator with the default piece length (256KB)
    pub fn new() -> Self {
        Self {
            piece_length: DEFAULT_PIECE_LENGTH,
        }
    }

    /// Creates a creator with a custom piece length; zero is clamped to one byte.
    pub fn with_piece_length(piece_length: u32) -> Self {
        Self {
            piece_length: piece_length.max(1),
        }
    }

    /// Hashes `file_path` and produces its descriptor.
    ///
    /// The first URL becomes `announce`; every URL is also listed as its own
    /// tier in `announce-list`.
    ///
    /// # Errors
    /// - `DescriptorError::Io` - File could not be opened or read
    /// - `DescriptorError::Invalid` - File is empty or has no usable name
    pub async fn create_from_file(
        &self,
        file_path: &Path,
        announce_urls: Vec<String>,
    ) -> Result<CreatedDescriptor, DescriptorError> {
        let mut file = File::open(file_path).await?;
        let file_size = file.metadata().await?.len();

        if file_size == 0 {
            return Err(DescriptorError::Invalid {
                reason: "Cannot create descriptor from empty file".to_string(),
            });
        }

        let name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DescriptorError::Invalid {
                reason: format!("Invalid file name: {}", file_path.display()),
            })?
            .to_string();

        let piece_hashes = self.hash_pieces(&mut file, file_size).await?;

        let info = BencodeValue::dict()
            .with("length", file_size as i64)
            .with("name", name.as_str())
            .with("piece length", i64::from(self.piece_length))
            .with("pieces", piece_hashes.concat());
        let info_bytes = info.encode();

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(&info_bytes));
        let info_hash = InfoHash::new(hash);

        let mut root = BencodeValue::dict().with("info", info);
        if let Some(primary) = announce_urls.first() {
            let tiers: Vec<BencodeValue> = announce_urls
                .iter()
                .map(|url| BencodeValue::List(vec![BencodeValue::from(url.as_str())]))
                .collect();
            root = root
                .with("announce", primary.as_str())
                .with("announce-list", tiers);
        }

        tracing::debug!(
            name = %name,
            info_hash = %info_hash,
            pieces = piece_hashes.len(),
            "created descriptor"
        );

        let descriptor = TorrentDescriptor {
            info_hash,
            name: name.clone(),
            piece_length: self.piece_length,
            piece_hashes,
            total_length: file_size,
            files: vec![TorrentFile {
                path: vec![name],
                length: file_size,
            }],
            announce_urls,
            multi_file: false,
        };

        Ok(CreatedDescriptor {
            descriptor,
            bytes: root.encode(),
        })
    }

    async fn hash_pieces(
        &self,
        file: &mut File,
        file_size: u64,
    ) -> Result<Vec<[u8; 20]>, DescriptorError> {
        let piece_length = u64::from(self.piece_length);
        let mut piece_hashes = Vec::with_capacity(file_size.div_ceil(piece_length) as usize);
        let mut buffer = vec![0u8; self.piece_length as usize];
        let mut position = 0u64;

        while position < file_size {
            let read_size = (file_size - position).min(piece_length) as usize;
            file.read_exact(&mut buffer[..read_size]).await?;

            let mut hash = [0u8; 20];
            hash.copy_from_slice(&Sha1::digest(&buffer[..read_size]));
            piece_hashes.push(hash);

            position += read_size as u64;
        }

        Ok(piece_hashes)
    }
}
