//! Per-file ingestion: probe → write → parse → decode → release.
//!
//! A [`Pipeline`] owns the single module instance. Requests run to completion
//! one at a time (`&mut self`); the module call itself is synchronous and is
//! never interrupted.

use crate::bridge::{BridgeError, MemoryBridge, ParseOutcome};
use crate::config::{InputOwnership, PipelineConfig};
use crate::decode::{DecodeError, ParsedAttestation, ResultDecoder};
use crate::log_bridge::LogSink;
use crate::module::{ModuleHandle, StartupError};
use crate::probe::{DecompressionProbe, InputOrigin, ProbeError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a request before an outcome is reached.
///
/// None of these are fatal to the host: the next file can be ingested.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl PipelineError {
    /// Suggested exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } | Self::Probe(_) => 3,
            Self::Bridge(_) => 1,
        }
    }
}

/// Metadata captured with the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMeta {
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// A user-supplied file, captured once and not modified afterwards.
#[derive(Debug, Clone)]
pub struct RawFile {
    meta: FileMeta,
    bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(
        name: impl Into<String>,
        last_modified: Option<DateTime<Utc>>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            meta: FileMeta {
                name: name.into(),
                last_modified,
                size: bytes.len() as u64,
            },
            bytes,
        }
    }

    /// Read a file from disk.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let io_err = |source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        };

        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        let last_modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, last_modified, bytes))
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_parts(self) -> (FileMeta, Vec<u8>) {
        (self.meta, self.bytes)
    }
}

/// Why a request produced no attestation.
#[derive(Debug)]
pub enum NoAttestation {
    /// The module returned the zero-length sentinel.
    ParseFailure,
    /// The module returned bytes that are not an attestation.
    Decode(DecodeError),
}

impl fmt::Display for NoAttestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoAttestation::ParseFailure => write!(f, "module could not parse the input"),
            NoAttestation::Decode(err) => write!(f, "{}", err),
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Attested(ParsedAttestation),
    NoAttestation(NoAttestation),
}

/// Result of one completed request.
#[derive(Debug)]
pub struct IngestReport {
    pub file: FileMeta,
    pub origin: InputOrigin,
    /// Length of the buffer handed to the module.
    pub decoded_len: usize,
    pub outcome: Outcome,
}

impl IngestReport {
    pub fn attestation(&self) -> Option<&ParsedAttestation> {
        match &self.outcome {
            Outcome::Attested(attestation) => Some(attestation),
            Outcome::NoAttestation(_) => None,
        }
    }

    pub fn into_attestation(self) -> Option<ParsedAttestation> {
        match self.outcome {
            Outcome::Attested(attestation) => Some(attestation),
            Outcome::NoAttestation(_) => None,
        }
    }
}

/// Composes the probe, bridge and decoder for each ingested file.
#[derive(Debug)]
pub struct Pipeline {
    probe: DecompressionProbe,
    bridge: MemoryBridge,
    decoder: ResultDecoder,
    ownership: InputOwnership,
}

impl Pipeline {
    /// Instantiate a pipeline over an already loaded module.
    pub fn new(
        handle: &ModuleHandle,
        config: &PipelineConfig,
        sink: Box<dyn LogSink>,
    ) -> Result<Self, StartupError> {
        let bridge = MemoryBridge::instantiate(handle, sink, &config.limits)?;
        Ok(Self {
            probe: DecompressionProbe::new(config.limits.max_decompressed_bytes),
            bridge,
            decoder: ResultDecoder::new(),
            ownership: config.input_ownership,
        })
    }

    /// Startup phase: load the configured module and instantiate it.
    pub async fn start(config: &PipelineConfig, sink: Box<dyn LogSink>) -> Result<Self, StartupError> {
        let path = config.module.as_ref().ok_or(StartupError::NoModule)?;
        let handle = ModuleHandle::load(path, &config.log_import).await?;
        Self::new(&handle, config, sink)
    }

    pub fn bridge(&self) -> &MemoryBridge {
        &self.bridge
    }

    pub fn input_ownership(&self) -> InputOwnership {
        self.ownership
    }

    pub async fn ingest_path(&mut self, path: impl AsRef<Path>) -> Result<IngestReport, PipelineError> {
        let raw = RawFile::read(path).await?;
        self.ingest(raw)
    }

    /// Run one file through the module.
    pub fn ingest(&mut self, raw: RawFile) -> Result<IngestReport, PipelineError> {
        let (file, bytes) = raw.into_parts();
        let span = tracing::info_span!("ingest", file = %file.name, size = file.size);
        let _enter = span.enter();

        let buffer = self.probe.normalize(bytes)?;
        match buffer.origin() {
            InputOrigin::Decompressed { compressed_len } => tracing::info!(
                compressed = compressed_len,
                decompressed = buffer.len(),
                "decompressed input"
            ),
            InputOrigin::PassedThrough { fallback } => tracing::info!(
                fallback = %fallback,
                "input not decompressed, assuming raw attestation"
            ),
        }

        let outcome = match exchange(&mut self.bridge, &self.decoder, self.ownership, buffer.bytes()) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "request aborted at module boundary");
                return Err(err.into());
            }
        };

        match &outcome {
            Outcome::Attested(attestation) => tracing::info!(
                sections = attestation.sections().len(),
                attributes = attestation.attribute_count(),
                "attestation decoded"
            ),
            Outcome::NoAttestation(reason) => {
                tracing::warn!(reason = %reason, "no attestation produced")
            }
        }

        Ok(IngestReport {
            file,
            origin: buffer.origin().clone(),
            decoded_len: buffer.len(),
            outcome,
        })
    }
}

/// Write the input, parse it and collect the result, releasing every region.
fn exchange(
    bridge: &mut MemoryBridge,
    decoder: &ResultDecoder,
    ownership: InputOwnership,
    bytes: &[u8],
) -> Result<Outcome, BridgeError> {
    let input = bridge.write(bytes)?;

    match ownership {
        InputOwnership::Host => bridge.scoped(input, |bridge, input| {
            let parsed = bridge.invoke_parse(input)?;
            collect(bridge, decoder, parsed)
        }),
        InputOwnership::Module => {
            let parsed = bridge.invoke_parse(&input);
            let surrendered = bridge.surrender(input);
            let outcome = parsed.and_then(|parsed| collect(bridge, decoder, parsed));
            surrendered.and(outcome)
        }
    }
}

fn collect(
    bridge: &mut MemoryBridge,
    decoder: &ResultDecoder,
    parsed: ParseOutcome,
) -> Result<Outcome, BridgeError> {
    match parsed {
        ParseOutcome::Failed => Ok(Outcome::NoAttestation(NoAttestation::ParseFailure)),
        ParseOutcome::Produced(result) => bridge.scoped(result, |bridge, result| {
            let bytes = bridge.read(result)?;
            Ok(decode_outcome(decoder, &bytes))
        }),
    }
}

fn decode_outcome(decoder: &ResultDecoder, bytes: &[u8]) -> Outcome {
    match decoder.decode(bytes) {
        Ok(attestation) => Outcome::Attested(attestation),
        Err(err) => Outcome::NoAttestation(NoAttestation::Decode(err)),
    }
}
