//! Resource limits for ingestion and the module boundary.
//!
//! Byte limits guard the host against oversized uploads, decompression bombs
//! and runaway module results.

use serde::{Deserialize, Serialize};
use std::io::Read;

/// Resource limits applied per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    /// Largest buffer copied into module memory.
    pub max_input_bytes: u64,
    /// Largest output accepted from the decompression probe.
    pub max_decompressed_bytes: u64,
    /// Largest result region copied out of module memory.
    pub max_result_bytes: u64,
    /// Longest module log line scanned for its NUL terminator.
    pub max_log_bytes: usize,
    /// Cap on module linear memory growth.
    pub max_module_memory_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_bytes: 64 * 1024 * 1024,         // 64 MB
            max_decompressed_bytes: 256 * 1024 * 1024, // 256 MB
            max_result_bytes: 64 * 1024 * 1024,        // 64 MB
            max_log_bytes: 64 * 1024,                  // 64 KB
            max_module_memory_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Partial overrides for `Limits`. Used for config file parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsOverrides {
    pub max_input_bytes: Option<u64>,
    pub max_decompressed_bytes: Option<u64>,
    pub max_result_bytes: Option<u64>,
    pub max_log_bytes: Option<usize>,
    pub max_module_memory_bytes: Option<usize>,
}

impl Limits {
    /// Apply overrides onto these defaults. Only `Some` values override.
    pub fn apply(self, overrides: LimitsOverrides) -> Self {
        Self {
            max_input_bytes: overrides.max_input_bytes.unwrap_or(self.max_input_bytes),
            max_decompressed_bytes: overrides
                .max_decompressed_bytes
                .unwrap_or(self.max_decompressed_bytes),
            max_result_bytes: overrides.max_result_bytes.unwrap_or(self.max_result_bytes),
            max_log_bytes: overrides.max_log_bytes.unwrap_or(self.max_log_bytes),
            max_module_memory_bytes: overrides
                .max_module_memory_bytes
                .unwrap_or(self.max_module_memory_bytes),
        }
    }
}

/// Marker error carried inside `std::io::Error` when a `LimitReader` overflows.
#[derive(Debug, thiserror::Error)]
#[error("{tag}: exceeded limit of {limit} bytes")]
pub(crate) struct LimitExceeded {
    pub tag: &'static str,
    pub limit: u64,
}

impl LimitExceeded {
    /// Recover the marker from an I/O error produced by a `LimitReader`.
    pub(crate) fn find(err: &std::io::Error) -> Option<&LimitExceeded> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<LimitExceeded>())
    }
}

/// A reader that limits the total number of bytes read and fails explicitly on overflow.
///
/// Reading exactly `limit` bytes is fine; the error is raised only once the
/// inner reader proves to have more.
pub(crate) struct LimitReader<R> {
    inner: R,
    limit: u64,
    read: u64,
    error_tag: &'static str,
}

impl<R: Read> LimitReader<R> {
    pub(crate) fn new(inner: R, limit: u64, error_tag: &'static str) -> Self {
        Self {
            inner,
            limit,
            read: 0,
            error_tag,
        }
    }
}

impl<R: Read> Read for LimitReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.read >= self.limit {
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(std::io::Error::other(LimitExceeded {
                    tag: self.error_tag,
                    limit: self.limit,
                })),
            };
        }

        let max_to_read = (self.limit - self.read).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max_to_read])?;
        self.read += n as u64;

        Ok(n)
    }
}
