use super::super::args::NormalizeArgs;
use super::config_path::resolve_config;
use crate::exit_codes;
use anyhow::Context;
use hsmattest_core::{DecompressionProbe, InputOrigin, RawFile};

/// Run only the decompression probe and write its output.
pub async fn run(args: NormalizeArgs) -> anyhow::Result<i32> {
    let config = resolve_config(args.config.as_deref())?;
    let probe = DecompressionProbe::new(config.limits.max_decompressed_bytes);

    let raw = match RawFile::read(&args.file).await {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("{}", err);
            return Ok(exit_codes::INPUT_ERROR);
        }
    };
    let (meta, bytes) = raw.into_parts();

    let buffer = match probe.normalize(bytes) {
        Ok(buffer) => buffer,
        Err(err) => {
            eprintln!("{}: {}", meta.name, err);
            return Ok(exit_codes::INPUT_ERROR);
        }
    };

    match buffer.origin() {
        InputOrigin::Decompressed { compressed_len } => println!(
            "{}: decompressed {} -> {} bytes",
            meta.name,
            compressed_len,
            buffer.len()
        ),
        InputOrigin::PassedThrough { fallback } => println!(
            "{}: passed through unchanged ({}), {} bytes",
            meta.name,
            fallback,
            buffer.len()
        ),
    }

    tokio::fs::write(&args.output, buffer.bytes())
        .await
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    Ok(exit_codes::SUCCESS)
}
