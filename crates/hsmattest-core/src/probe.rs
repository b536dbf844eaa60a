//! Decompression probe.
//!
//! Uploaded attestations may or may not be gzip-wrapped. There is no magic
//! byte check: the probe simply tries to inflate a single gzip member and, if
//! that fails for any decoding reason, hands the original bytes on unchanged.
//! A corrupt gzip file is therefore indistinguishable from an uncompressed
//! one. The fallback is reported through [`InputOrigin`] and logged so callers
//! can tell the two cases apart.

use crate::limits::{LimitExceeded, LimitReader};
use flate2::bufread::GzDecoder;
use serde::Serialize;
use std::fmt;
use std::io::{ErrorKind, Read};
use thiserror::Error;

/// Errors that stop the probe instead of falling back.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Inflated output grew past `max_decompressed_bytes`.
    #[error("decompressed input exceeds limit of {limit} bytes")]
    DecompressedTooLarge { limit: u64 },
}

/// Why the probe decided the input was not compressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Fallback {
    /// Nothing to decode.
    Empty,
    /// The stream ended before the gzip member was complete.
    Truncated,
    /// The gzip decoder rejected the input (bad header, corrupt deflate data, CRC mismatch).
    Undecodable { detail: String },
    /// A complete gzip member was followed by extra bytes.
    TrailingData { bytes: usize },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Empty => write!(f, "empty input"),
            Fallback::Truncated => write!(f, "truncated gzip stream"),
            Fallback::Undecodable { detail } => write!(f, "not gzip: {}", detail),
            Fallback::TrailingData { bytes } => {
                write!(f, "{} trailing bytes after gzip member", bytes)
            }
        }
    }
}

/// Where the bytes of a [`DecodedBuffer`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum InputOrigin {
    /// The input was a gzip member and has been inflated.
    Decompressed { compressed_len: usize },
    /// The input was passed through unchanged.
    PassedThrough { fallback: Fallback },
}

/// Bytes in the module's expected (uncompressed) input format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBuffer {
    bytes: Vec<u8>,
    origin: InputOrigin,
}

impl DecodedBuffer {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn origin(&self) -> &InputOrigin {
        &self.origin
    }

    pub fn was_decompressed(&self) -> bool {
        matches!(self.origin, InputOrigin::Decompressed { .. })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

enum Inflate {
    Limit(u64),
    Fallback(Fallback),
}

/// Detects and reverses a single gzip wrapper.
#[derive(Debug, Clone, Copy)]
pub struct DecompressionProbe {
    max_decompressed_bytes: u64,
}

impl Default for DecompressionProbe {
    fn default() -> Self {
        Self::new(crate::Limits::default().max_decompressed_bytes)
    }
}

impl DecompressionProbe {
    pub fn new(max_decompressed_bytes: u64) -> Self {
        Self {
            max_decompressed_bytes,
        }
    }

    /// Inflate `bytes` if they are one gzip member, otherwise return them as-is.
    pub fn normalize(&self, bytes: Vec<u8>) -> Result<DecodedBuffer, ProbeError> {
        if bytes.is_empty() {
            return Ok(passthrough(bytes, Fallback::Empty));
        }

        match self.inflate(&bytes) {
            Ok(inflated) => {
                tracing::debug!(
                    compressed = bytes.len(),
                    decompressed = inflated.len(),
                    "input was gzip-compressed"
                );
                Ok(DecodedBuffer {
                    bytes: inflated,
                    origin: InputOrigin::Decompressed {
                        compressed_len: bytes.len(),
                    },
                })
            }
            Err(Inflate::Limit(limit)) => Err(ProbeError::DecompressedTooLarge { limit }),
            Err(Inflate::Fallback(fallback)) => Ok(passthrough(bytes, fallback)),
        }
    }

    fn inflate(&self, bytes: &[u8]) -> Result<Vec<u8>, Inflate> {
        let mut decoder = GzDecoder::new(bytes);
        let mut inflated = Vec::new();

        let read = LimitReader::new(
            &mut decoder,
            self.max_decompressed_bytes,
            "max_decompressed_bytes",
        )
        .read_to_end(&mut inflated);

        if let Err(err) = read {
            if let Some(exceeded) = LimitExceeded::find(&err) {
                return Err(Inflate::Limit(exceeded.limit));
            }
            let fallback = match err.kind() {
                ErrorKind::UnexpectedEof => Fallback::Truncated,
                _ => Fallback::Undecodable {
                    detail: err.to_string(),
                },
            };
            return Err(Inflate::Fallback(fallback));
        }

        // Only one member is accepted; anything after it means the file was not a gzip stream.
        let trailing = decoder.into_inner().len();
        if trailing > 0 {
            return Err(Inflate::Fallback(Fallback::TrailingData { bytes: trailing }));
        }

        Ok(inflated)
    }
}

fn passthrough(bytes: Vec<u8>, fallback: Fallback) -> DecodedBuffer {
    tracing::debug!(
        len = bytes.len(),
        fallback = %fallback,
        "input not decompressed, passing through"
    );
    DecodedBuffer {
        bytes,
        origin: InputOrigin::PassedThrough { fallback },
    }
}
