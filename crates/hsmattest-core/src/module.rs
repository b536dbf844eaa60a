//! Parsing module loading and contract validation.
//!
//! The module is resolved once, before any request is accepted. Loading either
//! produces a ready [`ModuleHandle`] whose exports have been checked against
//! the boundary contract, or a [`StartupError`].

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use wasmtime::{Engine, ExternType, FuncType, Module, ValType};

pub const EXPORT_MEMORY: &str = "memory";
pub const EXPORT_ALLOC: &str = "alloc";
pub const EXPORT_DEALLOC: &str = "dealloc";
pub const EXPORT_DEALLOC_CSTRING: &str = "dealloc_cstring";
pub const EXPORT_PARSE: &str = "parse";

/// Import module the log callback is resolved from.
pub const LOG_IMPORT_MODULE: &str = "env";
pub const DEFAULT_LOG_IMPORT: &str = "consoleLog";

/// Errors raised while bringing the parsing module up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no parsing module configured (set `module` in the config or pass --module)")]
    NoModule,

    #[error("failed to read module {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile module: {0}")]
    Compile(#[source] wasmtime::Error),

    #[error("module does not export `{name}`")]
    MissingExport { name: &'static str },

    #[error("module export `{name}` must be a {expected}")]
    ExportKind {
        name: &'static str,
        expected: &'static str,
    },

    #[error("module export `{name}` has signature {found}, expected {expected}")]
    Signature {
        name: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("module imports unsupported `{module}::{name}`")]
    UnsupportedImport { module: String, name: String },

    #[error("failed to link host callbacks: {0}")]
    Link(#[source] wasmtime::Error),

    #[error("failed to instantiate module: {0}")]
    Instantiate(#[source] wasmtime::Error),

    #[error("failed to bind export `{name}`: {source}")]
    Bind {
        name: &'static str,
        #[source]
        source: wasmtime::Error,
    },

    #[error("module compilation task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

/// How `parse` hands back its `(offset, length)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseAbi {
    /// `parse(ptr, len) -> (ptr, len)`
    MultiValue,
    /// `parse(retptr, ptr, len)`, the pair is stored as two little-endian u32 at `retptr`.
    ReturnArea,
}

/// A compiled parsing module whose exports satisfy the boundary contract.
#[derive(Clone)]
pub struct ModuleHandle {
    engine: Engine,
    module: Module,
    abi: ParseAbi,
    log_import: Option<String>,
    source: Option<PathBuf>,
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("abi", &self.abi)
            .field("log_import", &self.log_import)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ModuleHandle {
    /// Read and compile a module (binary `.wasm` or text `.wat`).
    ///
    /// Compilation runs on the blocking pool; the returned handle is ready for
    /// [`crate::MemoryBridge::instantiate`].
    pub async fn load(path: impl AsRef<Path>, log_import: &str) -> Result<Self, StartupError> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| StartupError::Read {
                path: path.clone(),
                source,
            })?;

        let log_import = log_import.to_string();
        let source = path.clone();
        let handle =
            tokio::task::spawn_blocking(move || Self::from_bytes(&bytes, &log_import)).await??;

        tracing::info!(
            module = %path.display(),
            abi = ?handle.abi,
            log_callback = handle.log_import.is_some(),
            "parsing module ready"
        );
        Ok(Self {
            source: Some(source),
            ..handle
        })
    }

    /// Compile a module from memory and validate its contract.
    pub fn from_bytes(bytes: &[u8], log_import: &str) -> Result<Self, StartupError> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes).map_err(StartupError::Compile)?;
        let contract = validate_contract(&module, log_import)?;

        Ok(Self {
            engine,
            module,
            abi: contract.abi,
            log_import: contract.log_import,
            source: None,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn parse_abi(&self) -> ParseAbi {
        self.abi
    }

    /// Name of the log callback import, if the module declares one.
    pub fn log_import(&self) -> Option<&str> {
        self.log_import.as_deref()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Exported names with their rendered signatures, in module order.
    pub fn describe_exports(&self) -> Vec<(String, String)> {
        self.module
            .exports()
            .map(|export| {
                let rendered = match export.ty() {
                    ExternType::Func(ty) => render_signature(&ty),
                    ExternType::Memory(_) => "memory".to_string(),
                    ExternType::Global(_) => "global".to_string(),
                    ExternType::Table(_) => "table".to_string(),
                };
                (export.name().to_string(), rendered)
            })
            .collect()
    }
}

struct Contract {
    abi: ParseAbi,
    log_import: Option<String>,
}

fn validate_contract(module: &Module, log_import: &str) -> Result<Contract, StartupError> {
    match module.get_export(EXPORT_MEMORY) {
        Some(ExternType::Memory(_)) => {}
        Some(_) => {
            return Err(StartupError::ExportKind {
                name: EXPORT_MEMORY,
                expected: "memory",
            })
        }
        None => {
            return Err(StartupError::MissingExport {
                name: EXPORT_MEMORY,
            })
        }
    }

    expect_signature(module, EXPORT_ALLOC, 1, 1, "(i32) -> (i32)")?;
    expect_signature(module, EXPORT_DEALLOC, 2, 0, "(i32, i32) -> ()")?;
    expect_signature(module, EXPORT_DEALLOC_CSTRING, 1, 0, "(i32) -> ()")?;

    let parse = func_export(module, EXPORT_PARSE)?;
    let abi = if is_i32s(parse.params(), 2) && is_i32s(parse.results(), 2) {
        ParseAbi::MultiValue
    } else if is_i32s(parse.params(), 3) && parse.results().len() == 0 {
        ParseAbi::ReturnArea
    } else {
        return Err(StartupError::Signature {
            name: EXPORT_PARSE,
            expected: "(i32, i32) -> (i32, i32) or (i32, i32, i32) -> ()",
            found: render_signature(&parse),
        });
    };

    let mut declared_log_import = None;
    for import in module.imports() {
        let is_log = import.module() == LOG_IMPORT_MODULE && import.name() == log_import;
        let signature_ok = match import.ty() {
            ExternType::Func(ty) => is_i32s(ty.params(), 1) && ty.results().len() == 0,
            _ => false,
        };
        if !(is_log && signature_ok) {
            return Err(StartupError::UnsupportedImport {
                module: import.module().to_string(),
                name: import.name().to_string(),
            });
        }
        declared_log_import = Some(import.name().to_string());
    }

    Ok(Contract {
        abi,
        log_import: declared_log_import,
    })
}

fn func_export(module: &Module, name: &'static str) -> Result<FuncType, StartupError> {
    match module.get_export(name) {
        Some(ExternType::Func(ty)) => Ok(ty),
        Some(_) => Err(StartupError::ExportKind {
            name,
            expected: "function",
        }),
        None => Err(StartupError::MissingExport { name }),
    }
}

fn expect_signature(
    module: &Module,
    name: &'static str,
    params: usize,
    results: usize,
    expected: &'static str,
) -> Result<(), StartupError> {
    let ty = func_export(module, name)?;
    if is_i32s(ty.params(), params) && is_i32s(ty.results(), results) {
        Ok(())
    } else {
        Err(StartupError::Signature {
            name,
            expected,
            found: render_signature(&ty),
        })
    }
}

fn is_i32s(types: impl ExactSizeIterator<Item = ValType>, count: usize) -> bool {
    types.len() == count && types.into_iter().all(|ty| matches!(ty, ValType::I32))
}

fn render_types(types: impl Iterator<Item = ValType>) -> String {
    types
        .map(|ty| match ty {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            _ => "ref",
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_signature(ty: &FuncType) -> String {
    format!(
        "({}) -> ({})",
        render_types(ty.params()),
        render_types(ty.results())
    )
}
