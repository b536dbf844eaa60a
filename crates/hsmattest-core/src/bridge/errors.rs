//! Error types for the module memory bridge.

use super::{RegionKind, RequestState};
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that terminate the current request at the module boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An operation was called outside the write → parse → release sequence.
    #[error("`{op}` is not allowed while the bridge is {state:?}")]
    OutOfSequence {
        op: &'static str,
        state: RequestState,
    },

    /// Input larger than `max_input_bytes`.
    #[error("input of {len} bytes exceeds limit of {max} bytes")]
    InputTooLarge { len: usize, max: u64 },

    /// The module allocator trapped.
    #[error("module allocator failed for {size} bytes: {source}")]
    AllocationFailed {
        size: u32,
        #[source]
        source: wasmtime::Error,
    },

    /// The module allocator returned the null offset for a non-empty request.
    #[error("module allocator returned null for {size} bytes")]
    AllocatorReturnedNull { size: u32 },

    /// A region reported by the module does not fit its linear memory.
    #[error("region {offset:#x}+{length} lies outside module memory of {memory_size} bytes")]
    OutOfBounds {
        offset: u32,
        length: u32,
        memory_size: usize,
    },

    /// A module entry point trapped.
    #[error("module `{entry}` trapped: {source}")]
    Trap {
        entry: &'static str,
        #[source]
        source: wasmtime::Error,
    },

    /// The result region is larger than `max_result_bytes`.
    #[error("module result of {length} bytes exceeds limit of {max} bytes")]
    ResultTooLarge { length: u32, max: u64 },

    /// The pointer was issued by a different module instance.
    #[error("region {offset:#x}+{length} belongs to another module instance")]
    ForeignRegion { offset: u32, length: u32 },

    /// The pointer is not live (already released, or never issued).
    #[error("{kind:?} region {offset:#x}+{length} is not live")]
    UnknownRegion {
        offset: u32,
        length: u32,
        kind: RegionKind,
    },
}

impl BridgeError {
    /// True for failures caused by the module itself rather than host misuse.
    pub fn is_module_fault(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. }
                | Self::AllocatorReturnedNull { .. }
                | Self::OutOfBounds { .. }
                | Self::Trap { .. }
        )
    }
}
