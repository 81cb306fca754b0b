//! Input resolution: the print file named on the command line, or standard
//! input copied to a temporary file.
//!
//! The converters need a seekable file (PDF keeps its cross-reference table
//! at the end), so a document arriving on standard input is buffered to disk
//! first. The temporary file is owned by [`ResolvedInput`] and deleted when
//! it is dropped, which the driver does only after every stage was reaped.

use crate::error::FilterError;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

/// The resolved input: a file the scheduler gave us, or a buffered copy of
/// standard input.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Print file named on the command line.
    Local(PathBuf),
    /// Standard input, copied to a temporary file that is removed on drop.
    Buffered(TempPath),
}

impl ResolvedInput {
    /// Path of the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Buffered(tmp) => tmp,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, ResolvedInput::Buffered(_))
    }
}

/// Resolve the job's input: open-check `path` when given, otherwise buffer
/// standard input.
pub fn resolve_input(path: Option<&Path>) -> Result<ResolvedInput, FilterError> {
    match path {
        Some(path) => resolve_local(path),
        None => buffer_reader(io::stdin().lock()),
    }
}

/// Validate that an explicit print file can be opened.
fn resolve_local(path: &Path) -> Result<ResolvedInput, FilterError> {
    match File::open(path) {
        Ok(_) => {
            debug!("Resolved print file: {}", path.display());
            Ok(ResolvedInput::Local(path.to_path_buf()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FilterError::InputNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(FilterError::InputUnreadable {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Copy `reader` into a new temporary file.
pub fn buffer_reader<R: Read>(mut reader: R) -> Result<ResolvedInput, FilterError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("pdftops-")
        .suffix(".pdf")
        .tempfile()
        .map_err(FilterError::StdinBuffering)?;

    let bytes = io::copy(&mut reader, tmp.as_file_mut()).map_err(FilterError::StdinBuffering)?;
    tmp.as_file_mut()
        .sync_data()
        .map_err(FilterError::StdinBuffering)?;

    let path = tmp.into_temp_path();
    debug!("Copied {} bytes of print data to {}", bytes, path.display());
    Ok(ResolvedInput::Buffered(path))
}
