use super::super::args::InspectArgs;
use crate::exit_codes;
use anyhow::Context;
use hsmattest_core::module::LOG_IMPORT_MODULE;
use hsmattest_core::{ModuleHandle, ParseAbi, StartupError};

pub async fn run(args: InspectArgs) -> anyhow::Result<i32> {
    let config = args.module.resolve()?;
    let path = config.module.as_ref().ok_or(StartupError::NoModule)?;
    let handle = ModuleHandle::load(path, &config.log_import)
        .await
        .with_context(|| format!("failed to load module {}", path.display()))?;

    let abi = match handle.parse_abi() {
        ParseAbi::MultiValue => "multi-value (ptr, len) -> (ptr, len)",
        ParseAbi::ReturnArea => "return area (retptr, ptr, len)",
    };
    let log_import = match handle.log_import() {
        Some(name) => format!("{}.{}", LOG_IMPORT_MODULE, name),
        None => "none".to_string(),
    };

    println!("module:          {}", path.display());
    println!("parse:           {}", abi);
    println!("log import:      {}", log_import);
    println!("input ownership: {:?}", config.input_ownership);
    println!("exports:");
    for (name, signature) in handle.describe_exports() {
        println!("  {:<16} {}", name, signature);
    }
    Ok(exit_codes::SUCCESS)
}
