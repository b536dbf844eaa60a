//! Presenters for decoded attestations on stdout.

use hsmattest_core::{FileMeta, ParsedAttestation, Presenter};
use serde::Serialize;
use std::io::{self, Write};

/// Aligned `name  value` rows, one block per file.
pub struct TablePresenter<W: Write> {
    out: W,
    presented: usize,
}

impl<W: Write> TablePresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out, presented: 0 }
    }
}

impl<W: Write> Presenter for TablePresenter<W> {
    fn present(&mut self, file: &FileMeta, attestation: &ParsedAttestation) -> io::Result<()> {
        if self.presented > 0 {
            writeln!(self.out)?;
        }
        self.presented += 1;

        write!(self.out, "== {} ({} bytes", file.name, file.size)?;
        if let Some(modified) = file.last_modified {
            write!(self.out, ", modified {}", modified.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        writeln!(self.out, ")")?;

        if attestation.attribute_count() == 0 {
            writeln!(self.out, "(no attributes)")?;
            return Ok(());
        }

        let width = attestation
            .rows()
            .map(|(name, _)| name.chars().count())
            .max()
            .unwrap_or(0);
        for section in attestation.sections() {
            if let Some(name) = section.name() {
                writeln!(self.out, "-- {}", name)?;
            }
            for attr in section.attributes() {
                writeln!(self.out, "{:<width$}  {}", attr.name, attr.value, width = width)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// One JSON object per file (NDJSON).
pub struct JsonPresenter<W: Write> {
    out: W,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    file: &'a FileMeta,
    attestation: &'a ParsedAttestation,
}

impl<W: Write> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Presenter for JsonPresenter<W> {
    fn present(&mut self, file: &FileMeta, attestation: &ParsedAttestation) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, &JsonRecord { file, attestation })?;
        writeln!(self.out)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
