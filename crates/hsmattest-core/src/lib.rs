pub mod bridge;
pub mod config;
pub mod decode;
pub mod limits;
pub mod log_bridge;
pub mod module;
pub mod pipeline;
pub mod present;
pub mod probe;

// Convenience re-exports
pub use bridge::{
    BridgeError, BridgeStats, InstanceId, MemoryBridge, ModulePointer, ParseOutcome, RegionKind,
    RequestState,
};
pub use config::{load_config, ConfigError, InputOwnership, PipelineConfig, DEFAULT_CONFIG_FILE};
pub use decode::{Attribute, DecodeError, ParsedAttestation, ResultDecoder, Section};
pub use limits::{Limits, LimitsOverrides};
pub use log_bridge::{LogSink, MemorySink, ModuleLogLine, TracingSink, MODULE_LOG_TARGET};
pub use module::{ModuleHandle, ParseAbi, StartupError};
pub use pipeline::{
    FileMeta, IngestReport, NoAttestation, Outcome, Pipeline, PipelineError, RawFile,
};
pub use present::{CollectingPresenter, Presenter};
pub use probe::{DecodedBuffer, DecompressionProbe, Fallback, InputOrigin, ProbeError};
