//! Presentation seam for decoded attestations.
//!
//! The core never formats output itself; front-ends implement [`Presenter`].

use crate::decode::ParsedAttestation;
use crate::pipeline::FileMeta;
use std::io;

/// Receives each decoded attestation together with the file it came from.
pub trait Presenter {
    fn present(&mut self, file: &FileMeta, attestation: &ParsedAttestation) -> io::Result<()>;

    /// Called once after the last file.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps presented attestations in memory.
#[derive(Debug, Default)]
pub struct CollectingPresenter {
    pub presented: Vec<(FileMeta, ParsedAttestation)>,
}

impl Presenter for CollectingPresenter {
    fn present(&mut self, file: &FileMeta, attestation: &ParsedAttestation) -> io::Result<()> {
        self.presented.push((file.clone(), attestation.clone()));
        Ok(())
    }
}
