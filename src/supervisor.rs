//! Stage processes: what to run, and the seam that runs them.
//!
//! [`ProcessSupervisor`] is the only place that knows how a stage becomes an
//! operating-system process. The orchestrator and the reaper talk to it in
//! terms of process ids and [`StageExit`] values, so tests can substitute a
//! fake that never forks.

use serde::Serialize;
use std::future::Future;
use std::io::{self, PipeReader, PipeWriter};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::debug;

/// Position of a stage in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    /// PDF to PostScript (`pdftops` or `gs`).
    Conversion,
    /// Workaround injection into the PostScript prolog.
    Rewriter,
    /// Page imposition (`pstops`).
    Imposition,
}

/// One stage to start: executable, full argument vector and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSpec {
    pub role: StageRole,
    /// Name used in log lines.
    pub name: String,
    pub program: PathBuf,
    /// Argument vector, argv[0] included.
    pub argv: Vec<String>,
}

impl StageSpec {
    pub fn new(
        role: StageRole,
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        argv: Vec<String>,
    ) -> Self {
        Self {
            role,
            name: name.into(),
            program: program.into(),
            argv,
        }
    }
}

/// A started stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageHandle {
    pub pid: u32,
    pub role: StageRole,
    pub name: String,
}

/// How a stage process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageExit {
    Exited(i32),
    Signaled(i32),
}

impl From<ExitStatus> for StageExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => StageExit::Exited(code),
            (None, Some(signal)) => StageExit::Signaled(signal),
            (None, None) => StageExit::Exited(1),
        }
    }
}

/// Standard input of a stage.
#[derive(Debug)]
pub enum StageInput {
    /// The filter's own standard input.
    Inherit,
    /// Read end of the pipe from the previous stage.
    Pipe(PipeReader),
}

/// Standard output of a stage.
#[derive(Debug)]
pub enum StageOutput {
    /// The filter's own standard output.
    Inherit,
    /// Write end of the pipe to the next stage.
    Pipe(PipeWriter),
}

/// Starts, waits for and signals stage processes.
pub trait ProcessSupervisor {
    /// Start `spec` with the given standard streams, returning its pid.
    ///
    /// The pipe ends are consumed: once this returns, the caller holds no
    /// copy of them.
    fn spawn(&mut self, spec: &StageSpec, stdin: StageInput, stdout: StageOutput)
        -> io::Result<u32>;

    /// Wait for any started stage to end. `Ok(None)` means nothing is left
    /// to wait for. Must be cancel safe: dropping the future loses no exit.
    fn wait_any(&mut self) -> impl Future<Output = io::Result<Option<(u32, StageExit)>>> + Send;

    /// Ask the stage with `pid` to terminate (SIGTERM).
    fn terminate(&mut self, pid: u32) -> io::Result<()>;
}

/// [`ProcessSupervisor`] backed by real child processes.
#[derive(Debug, Default)]
pub struct ChildSupervisor {
    waits: JoinSet<(u32, io::Result<ExitStatus>)>,
}

impl ChildSupervisor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessSupervisor for ChildSupervisor {
    fn spawn(
        &mut self,
        spec: &StageSpec,
        stdin: StageInput,
        stdout: StageOutput,
    ) -> io::Result<u32> {
        let mut cmd = Command::new(&spec.program);
        if let Some((argv0, args)) = spec.argv.split_first() {
            cmd.arg0(argv0).args(args);
        }
        cmd.stdin(match stdin {
            StageInput::Inherit => Stdio::inherit(),
            StageInput::Pipe(reader) => Stdio::from(reader),
        });
        cmd.stdout(match stdout {
            StageOutput::Inherit => Stdio::inherit(),
            StageOutput::Pipe(writer) => Stdio::from(writer),
        });

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("stage was reaped before its pid was read"))?;
        debug!("Spawned {} as PID {}", spec.program.display(), pid);

        self.waits
            .spawn(async move { (pid, child.wait().await) });
        // `cmd` drops here, closing the parent's copies of the pipe ends
        Ok(pid)
    }

    async fn wait_any(&mut self) -> io::Result<Option<(u32, StageExit)>> {
        match self.waits.join_next().await {
            None => Ok(None),
            Some(Ok((pid, status))) => Ok(Some((pid, status?.into()))),
            Some(Err(join)) => Err(io::Error::other(join)),
        }
    }

    fn terminate(&mut self, pid: u32) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(io::Error::other)?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            // already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
