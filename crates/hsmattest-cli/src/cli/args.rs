use clap::{Parser, Subcommand, ValueEnum};
use hsmattest_core::InputOwnership;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hsmattest",
    version,
    about = "Parse HSM key attestation files through a sandboxed parsing module"
)]
pub struct Cli {
    /// Log output format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse attestation files and print their attributes
    Parse(ParseArgs),
    /// Load a parsing module and print the contract it exposes
    Inspect(InspectArgs),
    /// Write the decompressed form of an attestation file
    Normalize(NormalizeArgs),
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OwnershipArg {
    /// Host releases the input after parse
    Host,
    /// Module frees the input itself
    Module,
}

impl From<OwnershipArg> for InputOwnership {
    fn from(arg: OwnershipArg) -> Self {
        match arg {
            OwnershipArg::Host => InputOwnership::Host,
            OwnershipArg::Module => InputOwnership::Module,
        }
    }
}

/// Options shared by commands that load a parsing module.
#[derive(clap::Args, Debug, Clone)]
pub struct ModuleArgs {
    /// Config file (default: ./hsmattest.yaml when present)
    #[arg(long, env = "HSMATTEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Parsing module (.wasm or .wat); overrides the config file
    #[arg(long, env = "HSMATTEST_MODULE")]
    pub module: Option<PathBuf>,

    /// Who frees the input region after parse; overrides the config file
    #[arg(long, value_enum)]
    pub input_ownership: Option<OwnershipArg>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ParseArgs {
    /// Attestation files, processed in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub module: ModuleArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub module: ModuleArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct NormalizeArgs {
    /// Attestation file to normalize
    pub file: PathBuf,

    /// Where to write the decompressed bytes
    #[arg(short, long)]
    pub output: PathBuf,

    /// Config file supplying limits (default: ./hsmattest.yaml when present)
    #[arg(long, env = "HSMATTEST_CONFIG")]
    pub config: Option<PathBuf>,
}
