use super::super::args::{OutputFormat, ParseArgs};
use crate::exit_codes;
use crate::render::{JsonPresenter, TablePresenter};
use anyhow::Context;
use hsmattest_core::{Outcome, Pipeline, Presenter, TracingSink};

/// Files are processed strictly one after another on a single module instance.
pub async fn run(args: ParseArgs) -> anyhow::Result<i32> {
    let config = args.module.resolve()?;
    let mut pipeline = Pipeline::start(&config, Box::new(TracingSink))
        .await
        .context("failed to start parsing module")?;

    let stdout = std::io::stdout();
    let mut presenter: Box<dyn Presenter> = match args.format {
        OutputFormat::Table => Box::new(TablePresenter::new(stdout.lock())),
        OutputFormat::Json => Box::new(JsonPresenter::new(stdout.lock())),
    };

    let mut code = exit_codes::SUCCESS;
    for path in &args.files {
        match pipeline.ingest_path(path).await {
            Ok(report) => match &report.outcome {
                Outcome::Attested(attestation) => presenter
                    .present(&report.file, attestation)
                    .context("failed to write output")?,
                Outcome::NoAttestation(reason) => {
                    eprintln!("{}: no attestation: {}", report.file.name, reason);
                    code = code.max(exit_codes::NO_ATTESTATION);
                }
            },
            Err(err) => {
                eprintln!("{}: {}", path.display(), err);
                code = code.max(err.exit_code());
            }
        }
    }
    presenter.finish().context("failed to write output")?;

    let stats = pipeline.bridge().stats();
    tracing::debug!(
        files = args.files.len(),
        parses = stats.parses,
        parse_failures = stats.parse_failures,
        module_log_lines = stats.log_lines,
        "parse finished"
    );
    Ok(code)
}
