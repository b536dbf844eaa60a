//! Relay for module-originated log lines.
//!
//! The module calls the host log import with the offset of a NUL-terminated
//! string it allocated. The host scans for the terminator, forwards the text
//! to a [`LogSink`] and hands the string back through `dealloc_cstring`.
//! Nothing is returned to the module; a bad pointer is logged and skipped.

use crate::bridge::BridgeState;
use crate::module::{EXPORT_DEALLOC_CSTRING, EXPORT_MEMORY};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use wasmtime::{Caller, Extern};

/// Tracing target for forwarded module lines.
pub const MODULE_LOG_TARGET: &str = "hsmattest::module";

/// One line of module output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLogLine {
    pub text: String,
    /// No terminator was found within `max_log_bytes` or before the end of memory.
    pub truncated: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogBridgeError {
    #[error("log string offset {offset:#x} lies outside module memory of {memory_size} bytes")]
    OutOfBounds { offset: usize, memory_size: usize },
}

/// Destination for module log lines.
pub trait LogSink: Send {
    fn emit(&mut self, line: &ModuleLogLine);
}

/// Forwards module lines to `tracing` under [`MODULE_LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&mut self, line: &ModuleLogLine) {
        tracing::info!(
            target: MODULE_LOG_TARGET,
            truncated = line.truncated,
            "{}",
            line.text
        );
    }
}

/// Collects module lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<ModuleLogLine>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<ModuleLogLine> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|line| line.text).collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&mut self, line: &ModuleLogLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
    }
}

/// Read a NUL-terminated string starting at `offset`.
///
/// At most `max_len` bytes are scanned. Text is decoded lossily as UTF-8.
pub fn read_cstring(
    memory: &[u8],
    offset: usize,
    max_len: usize,
) -> Result<ModuleLogLine, LogBridgeError> {
    let window = memory.get(offset..).ok_or(LogBridgeError::OutOfBounds {
        offset,
        memory_size: memory.len(),
    })?;
    let window = &window[..window.len().min(max_len)];

    let (bytes, truncated) = match window.iter().position(|&b| b == 0) {
        Some(end) => (&window[..end], false),
        None => (window, true),
    };

    Ok(ModuleLogLine {
        text: String::from_utf8_lossy(bytes).into_owned(),
        truncated,
    })
}

/// Host implementation of the module's log import.
pub(crate) fn relay_module_log(mut caller: Caller<'_, BridgeState>, ptr: i32) -> wasmtime::Result<()> {
    let offset = ptr as u32 as usize;

    let Some(memory) = caller.get_export(EXPORT_MEMORY).and_then(Extern::into_memory) else {
        tracing::warn!("module log callback without exported memory");
        return Ok(());
    };

    let max_len = caller.data().max_log_bytes;
    let line = match read_cstring(memory.data(&caller), offset, max_len) {
        Ok(line) => line,
        Err(err) => {
            tracing::warn!(error = %err, "dropping module log line");
            return Ok(());
        }
    };

    if line.truncated {
        tracing::warn!(offset, max_len, "module log line has no terminator, truncated");
    }

    {
        let state = caller.data_mut();
        state.stats.log_lines += 1;
        state.sink.emit(&line);
    }

    let release = caller
        .get_export(EXPORT_DEALLOC_CSTRING)
        .and_then(Extern::into_func)
        .ok_or_else(|| anyhow::anyhow!("module does not export `{}`", EXPORT_DEALLOC_CSTRING))?
        .typed::<i32, ()>(&caller)?;
    release.call(&mut caller, ptr)?;
    caller.data_mut().stats.cstrings_released += 1;

    Ok(())
}
