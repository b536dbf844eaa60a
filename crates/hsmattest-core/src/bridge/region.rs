//! Regions of module linear memory handed across the boundary.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identifies the module instance a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Written by the host via `write`.
    Input,
    /// Returned by the module from `parse`.
    Result,
}

/// `(offset, length)` in a module's linear memory.
///
/// The module owns the bytes until the pointer is handed back through
/// [`crate::MemoryBridge::release`] (or surrendered when the module frees the
/// input itself). The type is neither `Clone` nor `Copy`, so each pointer can
/// be given back exactly once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "module regions must be released or surrendered"]
pub struct ModulePointer {
    offset: u32,
    length: u32,
    kind: RegionKind,
    owner: InstanceId,
}

impl ModulePointer {
    pub(crate) fn new(offset: u32, length: u32, kind: RegionKind, owner: InstanceId) -> Self {
        Self {
            offset,
            length,
            kind,
            owner,
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    pub(crate) fn key(&self) -> RegionKey {
        RegionKey {
            offset: self.offset,
            length: self.length,
            kind: self.kind,
        }
    }
}

/// Bookkeeping entry for a live region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionKey {
    pub offset: u32,
    pub length: u32,
    pub kind: RegionKind,
}
