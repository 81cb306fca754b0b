//! Error types for the pdftops filter library.
//!
//! Only conditions that stop the run are errors here. [`FilterError`] covers
//! them: the input cannot be read or buffered, a pipe or process cannot be
//! created, or the configuration is unusable. Every one of them maps to exit
//! status 1.
//!
//! A pipeline stage that exits non-zero or dies on a signal is *not* an error
//! of this crate. Those results are recorded as
//! [`crate::reaper::StageOutcome`] values inside the
//! [`crate::reaper::RunReport`] and folded into the aggregate exit status,
//! because sibling stages keep running and must still be reaped.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdftops filter library.
///
/// Per-stage failures use [`crate::reaper::StageOutcome`] and are stored in
/// [`crate::reaper::RunReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum FilterError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The print file named on the command line does not exist.
    #[error("Print file not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// The print file exists but could not be opened.
    #[error("Cannot open print file '{path}': {source}")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Standard input could not be copied to a temporary file.
    #[error("Unable to copy print data from standard input: {0}")]
    StdinBuffering(#[source] std::io::Error),

    // ── Resource errors ───────────────────────────────────────────────────
    /// `pipe()` failed while wiring two stages together.
    #[error("Unable to create pipe for {stage}: {source}")]
    PipeFailed {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// A stage process could not be started (fork or exec failed).
    #[error("Unable to execute {stage} program '{program}': {source}")]
    SpawnFailed {
        stage: String,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Profile errors ────────────────────────────────────────────────────
    /// The PPD file could not be read. Callers usually log this and continue
    /// without a device profile.
    #[error("Cannot read PPD file '{path}': {source}")]
    ProfileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A quirk identifier passed to the rewriter stage is not known.
    #[error("Unknown printer workaround '{0}'")]
    UnknownQuirk(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FilterError {
    /// Process exit status for this error. Every fatal condition reports 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
