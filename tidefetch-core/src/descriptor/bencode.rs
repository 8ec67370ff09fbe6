//! Bencode metainfo parsing and info hash calculation

use std::collections::HashSet;
use std::ops::Range;

use sha1::{Digest, Sha1};

use super::{DescriptorError, InfoHash, TorrentDescriptor, TorrentFile};

// Type aliases for complex bencode types
pub(super) type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
pub(super) type ParseResult<T> = Result<T, DescriptorError>;
type FilesResult = ParseResult<(Vec<TorrentFile>, u64)>;

fn invalid(reason: impl Into<String>) -> DescriptorError {
    DescriptorError::Invalid {
        reason: reason.into(),
    }
}

/// Bencode parsing utilities for torrent descriptor extraction.
pub struct DescriptorParser;

impl DescriptorParser {
    /// Parse bencode data and extract the torrent descriptor
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Bencode` - If the bytes are not bencode
    /// - `DescriptorError::Invalid` - If metadata extraction failed
    pub fn parse(torrent_bytes: &[u8]) -> ParseResult<TorrentDescriptor> {
        let parsed =
            bencode_rs::Value::parse(torrent_bytes).map_err(|e| DescriptorError::Bencode {
                reason: format!("{e:?}"),
            })?;

        let Some(root) = parsed.first() else {
            return Err(DescriptorError::Bencode {
                reason: "Empty bencode data".to_string(),
            });
        };

        let bencode_rs::Value::Dictionary(dict) = root else {
            return Err(invalid("Root element must be dictionary"));
        };

        let info_span = Self::top_level_value_span(torrent_bytes, b"info")?;
        let info_hash = Self::calculate_info_hash(&torrent_bytes[info_span]);

        Self::extract_descriptor_from_dict(dict, info_hash)
    }

    fn extract_descriptor_from_dict(
        dict: &BencodeDict<'_>,
        info_hash: InfoHash,
    ) -> ParseResult<TorrentDescriptor> {
        let Some(bencode_rs::Value::Dictionary(info_dict)) = dict.get(b"info".as_slice()) else {
            return Err(invalid("Info field must be dictionary"));
        };

        let name = Self::extract_bytes_as_string(info_dict, b"name")?;
        Self::validate_path_component(&name)?;

        let piece_length = Self::extract_integer(info_dict, b"piece length")?;
        if piece_length <= 0 || piece_length > i64::from(u32::MAX) {
            return Err(invalid(format!("Invalid piece length: {piece_length}")));
        }
        let piece_length = piece_length as u32;

        let pieces_bytes = Self::extract_bytes(info_dict, b"pieces")?;
        if pieces_bytes.len() % 20 != 0 {
            return Err(invalid("Invalid pieces length"));
        }

        let piece_hashes: Vec<[u8; 20]> = pieces_bytes
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let (files, total_length, multi_file) = match info_dict.get(b"length".as_slice()) {
            Some(bencode_rs::Value::Integer(length)) if *length >= 0 => {
                let length = *length as u64;
                let files = vec![TorrentFile {
                    path: vec![name.clone()],
                    length,
                }];
                (files, length, false)
            }
            Some(_) => return Err(invalid("Invalid 'length' field")),
            None => match info_dict.get(b"files".as_slice()) {
                Some(bencode_rs::Value::List(files_list)) => {
                    let (files, total_length) = Self::extract_files_info(files_list)?;
                    (files, total_length, true)
                }
                Some(_) => return Err(invalid("Invalid files structure")),
                None => return Err(invalid("Missing 'files' or 'length' field")),
            },
        };

        let expected_pieces = total_length.div_ceil(u64::from(piece_length));
        if expected_pieces != piece_hashes.len() as u64 {
            return Err(invalid(format!(
                "Piece count mismatch: expected {expected_pieces}, found {}",
                piece_hashes.len()
            )));
        }

        let announce_urls = Self::extract_announce_urls(dict);

        Ok(TorrentDescriptor {
            info_hash,
            name,
            piece_length,
            piece_hashes,
            total_length,
            files,
            announce_urls,
            multi_file,
        })
    }

    /// Calculate SHA1 hash of the raw info dictionary bytes
    fn calculate_info_hash(info_bytes: &[u8]) -> InfoHash {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&hasher.finalize());
        InfoHash::new(hash)
    }

    /// Locates the byte range of a value stored under `key` in the root dictionary.
    ///
    /// Walks keys of the root dictionary only, so an `info` string nested in
    /// announce URLs or file names cannot be mistaken for the info dictionary.
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Invalid` - If the key is missing or the data is malformed
    pub fn top_level_value_span(data: &[u8], key: &[u8]) -> ParseResult<Range<usize>> {
        if data.first() != Some(&b'd') {
            return Err(invalid("Expected dictionary start"));
        }

        let mut pos = 1;
        while pos < data.len() && data[pos] != b'e' {
            let key_end = Self::find_value_end(data, pos)?;
            let key_bytes = Self::string_payload(&data[pos..key_end])?;

            let value_start = key_end;
            let value_end = Self::find_value_end(data, value_start)?;
            if key_bytes == key {
                return Ok(value_start..value_end);
            }
            pos = value_end;
        }

        Err(invalid(format!(
            "Missing '{}' field",
            String::from_utf8_lossy(key)
        )))
    }

    /// Find the end position of the bencode value starting at `start`
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Invalid` - If the value is truncated or malformed
    pub fn find_value_end(data: &[u8], start: usize) -> ParseResult<usize> {
        let mut pos = start;
        let mut depth = 0usize;

        loop {
            let byte = *data
                .get(pos)
                .ok_or_else(|| invalid("Incomplete bencode value"))?;

            match byte {
                b'd' | b'l' => {
                    depth += 1;
                    pos += 1;
                }
                b'e' => {
                    if depth == 0 {
                        return Err(invalid("Unexpected end marker"));
                    }
                    depth -= 1;
                    pos += 1;
                }
                b'i' => {
                    let end = data[pos..]
                        .iter()
                        .position(|&b| b == b'e')
                        .ok_or_else(|| invalid("Unterminated integer"))?;
                    pos += end + 1;
                }
                b'0'..=b'9' => {
                    let colon = data[pos..]
                        .iter()
                        .position(|&b| b == b':')
                        .ok_or_else(|| invalid("Invalid string format"))?;
                    let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                        .ok()
                        .and_then(|digits| digits.parse().ok())
                        .ok_or_else(|| invalid("Invalid string length"))?;

                    pos = (pos + colon + 1)
                        .checked_add(length)
                        .filter(|end| *end <= data.len())
                        .ok_or_else(|| invalid("String exceeds data length"))?;
                }
                _ => return Err(invalid("Invalid bencode character")),
            }

            if depth == 0 {
                return Ok(pos);
            }
        }
    }

    fn string_payload(encoded: &[u8]) -> ParseResult<&[u8]> {
        let colon = encoded
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| invalid("Dictionary key must be a string"))?;
        Ok(&encoded[colon + 1..])
    }

    /// Extract string from bencode dictionary
    fn extract_bytes_as_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
        let bytes = Self::extract_bytes(dict, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            invalid(format!(
                "Invalid UTF-8 in field: {:?}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    /// Extract bytes from bencode dictionary
    fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(invalid(format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    /// Extract integer from bencode dictionary
    fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => Ok(*value),
            _ => Err(invalid(format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    /// Rejects components that would let a file escape the data directory.
    fn validate_path_component(component: &str) -> ParseResult<()> {
        let unsafe_component = component.is_empty()
            || component == "."
            || component == ".."
            || component.contains('/')
            || component.contains('\\')
            || component.contains('\0');

        if unsafe_component {
            return Err(DescriptorError::UnsafePath {
                path: component.to_string(),
            });
        }
        Ok(())
    }

    /// Extract files information from multi-file torrent
    fn extract_files_info(files_list: &[bencode_rs::Value<'_>]) -> FilesResult {
        if files_list.is_empty() {
            return Err(invalid("Empty files list"));
        }

        let mut files = Vec::with_capacity(files_list.len());
        let mut total_length = 0u64;

        for file_value in files_list {
            let bencode_rs::Value::Dictionary(file_dict) = file_value else {
                return Err(invalid("Invalid file entry type"));
            };

            let length = Self::extract_integer(file_dict, b"length")?;
            if length < 0 {
                return Err(invalid("Negative file length"));
            }
            total_length = total_length
                .checked_add(length as u64)
                .ok_or_else(|| invalid("Total length overflow"))?;

            let Some(bencode_rs::Value::List(path_list)) = file_dict.get(b"path".as_slice()) else {
                return Err(invalid("Missing or invalid path in file"));
            };
            if path_list.is_empty() {
                return Err(invalid("Empty path in file"));
            }

            let mut path = Vec::with_capacity(path_list.len());
            for path_component in path_list {
                let bencode_rs::Value::Bytes(component) = path_component else {
                    return Err(invalid("Invalid path component type"));
                };
                let component = String::from_utf8(component.to_vec())
                    .map_err(|_| invalid("Invalid UTF-8 in file path"))?;
                Self::validate_path_component(&component)?;
                path.push(component);
            }

            files.push(TorrentFile {
                path,
                length: length as u64,
            });
        }

        Ok((files, total_length))
    }

    /// Extract announce URLs from `announce` and `announce-list`, de-duplicated
    fn extract_announce_urls(dict: &BencodeDict<'_>) -> Vec<String> {
        let mut announce_urls = Vec::new();
        let mut seen = HashSet::new();

        if let Ok(announce) = Self::extract_bytes_as_string(dict, b"announce")
            && seen.insert(announce.clone())
        {
            announce_urls.push(announce);
        }

        if let Some(bencode_rs::Value::List(announce_list)) = dict.get(b"announce-list".as_slice())
        {
            for tier in announce_list {
                let bencode_rs::Value::List(tier_urls) = tier else {
                    continue;
                };
                for url_value in tier_urls {
                    if let bencode_rs::Value::Bytes(url_bytes) = url_value
                        && let Ok(url) = String::from_utf8(url_bytes.to_vec())
                        && seen.insert(url.clone())
                    {
                        announce_urls.push(url);
                    }
                }
            }
        }

        announce_urls
    }
}
