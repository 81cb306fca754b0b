//! Pipeline orchestration: wire stages together with pipes and start them.
//!
//! ```text
//!   stdin ─▶ conversion ─pipe─▶ rewriter ─pipe─▶ imposition ─▶ stdout
//! ```
//!
//! The rewriter is optional; with two stages there is a single pipe. Pipe
//! descriptors are close-on-exec, so every child ends up with exactly its own
//! two ends, and the orchestrator gives up its copies as each stage starts.
//! No stage is left waiting for an end-of-file that never comes.

use crate::cancel::CancelToken;
use crate::error::FilterError;
use crate::reaper::{self, RunReport};
use crate::supervisor::{ProcessSupervisor, StageHandle, StageInput, StageOutput, StageSpec};
use std::io::PipeReader;
use tracing::{error, info};

/// Starts a pipeline and keeps track of its stages until they are reaped.
#[derive(Debug)]
pub struct Orchestrator<S> {
    supervisor: S,
    handles: Vec<StageHandle>,
}

impl<S: ProcessSupervisor> Orchestrator<S> {
    pub fn new(supervisor: S) -> Self {
        Self {
            supervisor,
            handles: Vec::new(),
        }
    }

    /// Start `specs` in order, each reading the previous one's output.
    ///
    /// The first stage inherits the filter's standard input, the last its
    /// standard output. On a pipe or spawn failure the remaining stages are
    /// not started; the ones already running stay registered and must still
    /// be reaped with [`Orchestrator::reap`].
    pub fn spawn_all(&mut self, specs: &[StageSpec]) -> Result<(), FilterError> {
        let mut upstream: Option<PipeReader> = None;

        for (index, spec) in specs.iter().enumerate() {
            let stdin = match upstream.take() {
                Some(reader) => StageInput::Pipe(reader),
                None => StageInput::Inherit,
            };

            let (stdout, next) = if index + 1 < specs.len() {
                let (reader, writer) = std::io::pipe().map_err(|e| {
                    error!("Unable to create pipe for {}: {}", spec.name, e);
                    FilterError::PipeFailed {
                        stage: spec.name.clone(),
                        source: e,
                    }
                })?;
                (StageOutput::Pipe(writer), Some(reader))
            } else {
                (StageOutput::Inherit, None)
            };

            let pid = self.supervisor.spawn(spec, stdin, stdout).map_err(|e| {
                error!("Unable to execute {} program: {}", spec.name, e);
                FilterError::SpawnFailed {
                    stage: spec.name.clone(),
                    program: spec.program.clone(),
                    source: e,
                }
            })?;

            info!("Started filter {} (PID {})", spec.name, pid);
            self.handles.push(StageHandle {
                pid,
                role: spec.role,
                name: spec.name.clone(),
            });
            upstream = next;
        }

        Ok(())
    }

    /// Wait for every started stage, forwarding cancellation.
    pub async fn reap(&mut self, cancel: &CancelToken) -> RunReport {
        let report = reaper::reap(&mut self.supervisor, &self.handles, cancel).await;
        self.handles.clear();
        report
    }

    /// Stages started and not yet reaped.
    pub fn handles(&self) -> &[StageHandle] {
        &self.handles
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }
}
