//! Host side of the linear-memory exchange with the parsing module.
//!
//! One request moves through `write → invoke_parse → release`:
//!
//! ```text
//! Idle → BufferWritten → (Parsed | ParseFailed) → ResultReleased → Idle
//! ```
//!
//! Every [`ModulePointer`] handed out by `write` or `invoke_parse` is tracked
//! until it is given back exactly once, either through [`MemoryBridge::release`]
//! or, for inputs the module frees itself, [`MemoryBridge::surrender`].
//! [`MemoryBridge::scoped`] guarantees the release on every exit path of the
//! enclosed work.
//!
//! The module is not reentrant and its allocator is shared state, so all
//! operations take `&mut self`: a second request cannot start while the
//! first one still holds regions.

pub mod errors;
mod region;

pub use errors::{BridgeError, BridgeResult};
pub use region::{InstanceId, ModulePointer, RegionKind};

use crate::limits::Limits;
use crate::log_bridge::{relay_module_log, LogSink};
use crate::module::{
    ModuleHandle, ParseAbi, StartupError, EXPORT_ALLOC, EXPORT_DEALLOC, EXPORT_MEMORY,
    EXPORT_PARSE, LOG_IMPORT_MODULE,
};
use region::RegionKey;
use serde::Serialize;
use wasmtime::{Linker, Memory, Store, StoreLimits, StoreLimitsBuilder, TypedFunc};

/// Size of the `(offset, length)` pair written by a return-area `parse`.
const RETURN_AREA_LEN: u32 = 8;

/// Per-request protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    BufferWritten,
    Parsed,
    ParseFailed,
    ResultReleased,
}

/// Result of a `parse` call.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum ParseOutcome {
    /// The module produced a result region. It must be released.
    Produced(ModulePointer),
    /// Zero-length sentinel: the module could not parse the input.
    Failed,
}

/// Counters for calls made across the boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub allocations: u64,
    pub releases: u64,
    pub surrendered: u64,
    pub parses: u64,
    pub parse_failures: u64,
    pub log_lines: u64,
    pub cstrings_released: u64,
}

/// Data owned by the wasmtime store.
pub(crate) struct BridgeState {
    pub(crate) sink: Box<dyn LogSink>,
    pub(crate) max_log_bytes: usize,
    pub(crate) stats: BridgeStats,
    store_limits: StoreLimits,
}

#[derive(Clone)]
enum ParseEntry {
    MultiValue(TypedFunc<(i32, i32), (i32, i32)>),
    ReturnArea(TypedFunc<(i32, i32, i32), ()>),
}

struct BoundExports {
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    dealloc: TypedFunc<(i32, i32), ()>,
    parse: ParseEntry,
}

/// Owns one module instance and the protocol for exchanging bytes with it.
pub struct MemoryBridge {
    store: Store<BridgeState>,
    exports: BoundExports,
    owner: InstanceId,
    state: RequestState,
    live: Vec<RegionKey>,
    max_input_bytes: u64,
    max_result_bytes: u64,
}

impl MemoryBridge {
    /// Instantiate the module and bind its entry points.
    pub fn instantiate(
        handle: &ModuleHandle,
        sink: Box<dyn LogSink>,
        limits: &Limits,
    ) -> Result<Self, StartupError> {
        let state = BridgeState {
            sink,
            max_log_bytes: limits.max_log_bytes,
            stats: BridgeStats::default(),
            store_limits: StoreLimitsBuilder::new()
                .memory_size(limits.max_module_memory_bytes)
                .build(),
        };
        let mut store = Store::new(handle.engine(), state);
        store.limiter(|state| &mut state.store_limits);

        let mut linker = Linker::new(handle.engine());
        if let Some(import) = handle.log_import() {
            linker
                .func_wrap(LOG_IMPORT_MODULE, import, relay_module_log)
                .map_err(StartupError::Link)?;
        }

        let instance = linker
            .instantiate(&mut store, handle.module())
            .map_err(StartupError::Instantiate)?;

        let memory = instance
            .get_memory(&mut store, EXPORT_MEMORY)
            .ok_or(StartupError::MissingExport {
                name: EXPORT_MEMORY,
            })?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, EXPORT_ALLOC)
            .map_err(bind(EXPORT_ALLOC))?;
        let dealloc = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, EXPORT_DEALLOC)
            .map_err(bind(EXPORT_DEALLOC))?;
        let parse = match handle.parse_abi() {
            ParseAbi::MultiValue => ParseEntry::MultiValue(
                instance
                    .get_typed_func(&mut store, EXPORT_PARSE)
                    .map_err(bind(EXPORT_PARSE))?,
            ),
            ParseAbi::ReturnArea => ParseEntry::ReturnArea(
                instance
                    .get_typed_func(&mut store, EXPORT_PARSE)
                    .map_err(bind(EXPORT_PARSE))?,
            ),
        };

        Ok(Self {
            store,
            exports: BoundExports {
                memory,
                alloc,
                dealloc,
                parse,
            },
            owner: InstanceId::next(),
            state: RequestState::Idle,
            live: Vec::new(),
            max_input_bytes: limits.max_input_bytes,
            max_result_bytes: limits.max_result_bytes,
        })
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.store.data().stats
    }

    /// Number of regions handed out and not yet given back.
    pub fn outstanding(&self) -> usize {
        self.live.len()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.owner
    }

    /// Current size of the module's linear memory.
    pub fn memory_size(&self) -> usize {
        self.exports.memory.data_size(&self.store)
    }

    /// Allocate `bytes.len()` bytes in module memory and copy `bytes` in.
    pub fn write(&mut self, bytes: &[u8]) -> BridgeResult<ModulePointer> {
        self.expect_state("write", RequestState::Idle)?;

        let length = u32::try_from(bytes.len())
            .ok()
            .filter(|&len| u64::from(len) <= self.max_input_bytes)
            .ok_or(BridgeError::InputTooLarge {
                len: bytes.len(),
                max: self.max_input_bytes,
            })?;

        let offset = self.allocate(length)?;
        if let Err(err) = self
            .exports
            .memory
            .write(&mut self.store, offset as usize, bytes)
        {
            tracing::warn!(offset, length, error = %err, "copy-in failed after allocation");
            if let Err(release_err) = self.give_back(offset, length) {
                tracing::warn!(offset, length, error = %release_err, "release failed after copy-in error");
            }
            return Err(self.out_of_bounds(offset, length));
        }

        self.state = RequestState::BufferWritten;
        tracing::trace!(offset, length, "input written to module memory");
        Ok(self.track(offset, length, RegionKind::Input))
    }

    /// Call the module's `parse` entry point on a written input region.
    ///
    /// A zero result length is reported as [`ParseOutcome::Failed`] and leaves
    /// nothing to release besides the input.
    pub fn invoke_parse(&mut self, input: &ModulePointer) -> BridgeResult<ParseOutcome> {
        self.expect_state("invoke_parse", RequestState::BufferWritten)?;
        self.expect_live(input)?;

        let parse = self.exports.parse.clone();
        let args = (input.offset() as i32, input.length() as i32);
        let (offset, length) = match parse {
            ParseEntry::MultiValue(func) => {
                let (offset, length) = func
                    .call(&mut self.store, args)
                    .map_err(|source| BridgeError::Trap {
                        entry: EXPORT_PARSE,
                        source,
                    })?;
                (offset as u32, length as u32)
            }
            ParseEntry::ReturnArea(func) => self.parse_via_return_area(func, args)?,
        };
        self.store.data_mut().stats.parses += 1;

        if length == 0 {
            self.state = RequestState::ParseFailed;
            self.store.data_mut().stats.parse_failures += 1;
            tracing::debug!("module signalled parse failure");
            return Ok(ParseOutcome::Failed);
        }

        if let Err(err) = self.check_bounds(offset, length) {
            // An out-of-bounds region cannot be handed back to the allocator.
            self.state = RequestState::ParseFailed;
            return Err(err);
        }

        self.state = RequestState::Parsed;
        tracing::trace!(offset, length, "module produced result");
        Ok(ParseOutcome::Produced(self.track(
            offset,
            length,
            RegionKind::Result,
        )))
    }

    /// Copy the bytes of a live region out of module memory.
    pub fn read(&mut self, region: &ModulePointer) -> BridgeResult<Vec<u8>> {
        self.expect_live(region)?;
        if region.kind() == RegionKind::Result && u64::from(region.length()) > self.max_result_bytes
        {
            return Err(BridgeError::ResultTooLarge {
                length: region.length(),
                max: self.max_result_bytes,
            });
        }

        let mut bytes = vec![0u8; region.length() as usize];
        self.exports
            .memory
            .read(&self.store, region.offset() as usize, &mut bytes)
            .map_err(|_| self.out_of_bounds(region.offset(), region.length()))?;
        Ok(bytes)
    }

    /// Hand a region back to the module allocator.
    ///
    /// The region is forgotten even if `dealloc` traps; it is never released twice.
    pub fn release(&mut self, region: ModulePointer) -> BridgeResult<()> {
        self.untrack(&region)?;
        let released = self.give_back(region.offset(), region.length());
        if region.kind() == RegionKind::Result {
            self.state = RequestState::ResultReleased;
        }
        self.settle();
        released
    }

    /// Forget a region the module has already freed on its own.
    pub fn surrender(&mut self, region: ModulePointer) -> BridgeResult<()> {
        self.untrack(&region)?;
        self.store.data_mut().stats.surrendered += 1;
        self.settle();
        Ok(())
    }

    /// Run `work` with `region`, then release it whatever `work` returned.
    ///
    /// The error from `work` wins over a release error.
    pub fn scoped<R>(
        &mut self,
        region: ModulePointer,
        work: impl FnOnce(&mut Self, &ModulePointer) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let outcome = work(self, &region);
        let released = self.release(region);

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                tracing::warn!(error = %release_err, "release failed while unwinding request");
                Err(err)
            }
        }
    }

    fn parse_via_return_area(
        &mut self,
        func: TypedFunc<(i32, i32, i32), ()>,
        (ptr, len): (i32, i32),
    ) -> BridgeResult<(u32, u32)> {
        let area = self.allocate(RETURN_AREA_LEN)?;

        let pair = func
            .call(&mut self.store, (area as i32, ptr, len))
            .map_err(|source| BridgeError::Trap {
                entry: EXPORT_PARSE,
                source,
            })
            .and_then(|()| {
                let mut raw = [0u8; RETURN_AREA_LEN as usize];
                self.exports
                    .memory
                    .read(&self.store, area as usize, &mut raw)
                    .map_err(|_| self.out_of_bounds(area, RETURN_AREA_LEN))?;
                let offset = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let length = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
                Ok((offset, length))
            });

        let released = self.give_back(area, RETURN_AREA_LEN);
        let pair = pair?;
        released?;
        Ok(pair)
    }

    fn allocate(&mut self, size: u32) -> BridgeResult<u32> {
        let raw = self
            .exports
            .alloc
            .call(&mut self.store, size as i32)
            .map_err(|source| BridgeError::AllocationFailed { size, source })?;
        let offset = raw as u32;

        if offset == 0 && size > 0 {
            return Err(BridgeError::AllocatorReturnedNull { size });
        }
        self.check_bounds(offset, size)?;
        self.store.data_mut().stats.allocations += 1;
        Ok(offset)
    }

    /// Call `dealloc` and count the release when it returns.
    fn give_back(&mut self, offset: u32, length: u32) -> BridgeResult<()> {
        self.exports
            .dealloc
            .call(&mut self.store, (offset as i32, length as i32))
            .map_err(|source| BridgeError::Trap {
                entry: EXPORT_DEALLOC,
                source,
            })?;
        self.store.data_mut().stats.releases += 1;
        Ok(())
    }

    fn check_bounds(&self, offset: u32, length: u32) -> BridgeResult<()> {
        let end = u64::from(offset) + u64::from(length);
        if end > self.memory_size() as u64 {
            return Err(self.out_of_bounds(offset, length));
        }
        Ok(())
    }

    fn out_of_bounds(&self, offset: u32, length: u32) -> BridgeError {
        BridgeError::OutOfBounds {
            offset,
            length,
            memory_size: self.memory_size(),
        }
    }

    fn expect_state(&self, op: &'static str, expected: RequestState) -> BridgeResult<()> {
        if self.state != expected {
            return Err(BridgeError::OutOfSequence {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    fn track(&mut self, offset: u32, length: u32, kind: RegionKind) -> ModulePointer {
        let pointer = ModulePointer::new(offset, length, kind, self.owner);
        self.live.push(pointer.key());
        pointer
    }

    fn expect_live(&self, region: &ModulePointer) -> BridgeResult<()> {
        self.position(region).map(|_| ())
    }

    fn untrack(&mut self, region: &ModulePointer) -> BridgeResult<()> {
        let index = self.position(region)?;
        self.live.swap_remove(index);
        Ok(())
    }

    fn position(&self, region: &ModulePointer) -> BridgeResult<usize> {
        if region.owner() != self.owner {
            return Err(BridgeError::ForeignRegion {
                offset: region.offset(),
                length: region.length(),
            });
        }
        let key = region.key();
        self.live
            .iter()
            .position(|live| *live == key)
            .ok_or(BridgeError::UnknownRegion {
                offset: key.offset,
                length: key.length,
                kind: key.kind,
            })
    }

    fn settle(&mut self) {
        if self.live.is_empty() {
            self.state = RequestState::Idle;
        }
    }
}

fn bind(name: &'static str) -> impl FnOnce(wasmtime::Error) -> StartupError {
    move |source| StartupError::Bind { name, source }
}

impl std::fmt::Debug for MemoryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBridge")
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("outstanding", &self.live.len())
            .finish_non_exhaustive()
    }
}
