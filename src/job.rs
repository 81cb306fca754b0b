//! The print job as handed to the filter by the scheduler.

use crate::pipeline::options::JobOptions;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One print job: the positional filter arguments.
///
/// The scheduler invokes every filter as
/// `argv[0]=printer job user title copies options [file]`. Job id, user and
/// title are forwarded verbatim to the imposition stage; they are kept as
/// strings because the filter never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    /// Destination queue name (argv[0]).
    pub printer: String,
    pub job_id: String,
    pub user: String,
    pub title: String,
    /// Copies requested for the job.
    pub copies: u32,
    /// Raw job options, e.g. `"fit-to-page landscape media=A4"`.
    pub options: String,
    /// Print file. `None` means the document arrives on standard input.
    pub input: Option<PathBuf>,
}

impl JobRequest {
    pub fn new(
        printer: impl Into<String>,
        job_id: impl Into<String>,
        user: impl Into<String>,
        title: impl Into<String>,
        copies: u32,
        options: impl Into<String>,
    ) -> Self {
        Self {
            printer: printer.into(),
            job_id: job_id.into(),
            user: user.into(),
            title: title.into(),
            copies,
            options: options.into(),
            input: None,
        }
    }

    /// Read the document from `path` instead of standard input.
    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    /// Parse the raw option string.
    pub fn parsed_options(&self) -> JobOptions {
        JobOptions::parse(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_reads_stdin_by_default() {
        let job = JobRequest::new("laser", "42", "alice", "report", 2, "landscape");
        assert!(job.input_path().is_none());
        assert_eq!(job.copies, 2);
        assert_eq!(job.parsed_options().get("landscape"), Some("true"));
    }

    #[test]
    fn with_input_sets_path() {
        let job = JobRequest::new("laser", "42", "alice", "report", 1, "").with_input("/tmp/x.pdf");
        assert_eq!(job.input_path(), Some(Path::new("/tmp/x.pdf")));
    }
}
