//! Reaping: wait for every stage, forward cancellation, fold exit statuses.
//!
//! ```text
//!            ┌──────── stage exits ────────┐
//!            ▼                             │
//!  Running ──┴── SIGTERM caught ──▶ forward SIGTERM to every
//!     │                            outstanding stage, clear flag
//!     └── all stages reaped ──▶ Done
//! ```
//!
//! One stage failing does not stop its siblings. Each is waited for and the
//! last failure decides the aggregate exit status. A stage that dies of the
//! SIGTERM we forwarded is an expected outcome of cancellation and is not
//! counted as a crash.

use crate::cancel::CancelToken;
use crate::supervisor::{ProcessSupervisor, StageExit, StageHandle, StageRole};
use serde::Serialize;
use std::io;
use tracing::{debug, error, warn};

const SIGTERM: i32 = 15;

/// How one stage ended, as far as the job is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    /// Exited with a non-zero status.
    Failed(i32),
    /// Killed by SIGTERM, normally our own cancellation.
    TerminatedByRequest,
    /// Killed by any other signal.
    Crashed(i32),
}

impl StageOutcome {
    pub fn classify(exit: StageExit) -> Self {
        match exit {
            StageExit::Exited(0) => StageOutcome::Success,
            StageExit::Exited(code) => StageOutcome::Failed(code),
            StageExit::Signaled(SIGTERM) => StageOutcome::TerminatedByRequest,
            StageExit::Signaled(signal) => StageOutcome::Crashed(signal),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }

    /// Contribution to the aggregate exit status, if any.
    fn exit_code(&self) -> Option<i32> {
        match self {
            StageOutcome::Failed(code) => Some(*code),
            StageOutcome::Crashed(signal) => Some(*signal),
            StageOutcome::Success | StageOutcome::TerminatedByRequest => None,
        }
    }
}

/// Result for one reaped stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub pid: u32,
    pub role: StageRole,
    pub name: String,
    pub outcome: StageOutcome,
}

/// What happened to the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Reaped stages in reaping order.
    pub stages: Vec<StageResult>,
    /// Aggregate exit status.
    pub exit_code: i32,
    /// The most recent outcome that was not a success.
    pub last_failure: Option<StageOutcome>,
    /// A cancellation was forwarded to the stages.
    pub canceled: bool,
    /// Waiting failed before every stage was reaped.
    pub ended_early: bool,
}

impl RunReport {
    fn record(&mut self, handle: &StageHandle, outcome: StageOutcome) {
        if let Some(code) = outcome.exit_code() {
            self.exit_code = code;
        }
        if !outcome.is_success() {
            self.last_failure = Some(outcome);
        }
        self.stages.push(StageResult {
            pid: handle.pid,
            role: handle.role,
            name: handle.name.clone(),
            outcome,
        });
    }

    pub fn outcome_of(&self, role: StageRole) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.ended_early
    }
}

enum Event {
    Cancel,
    Reaped(io::Result<Option<(u32, StageExit)>>),
}

/// Wait until every stage in `handles` has been reaped.
///
/// A cancellation seen on `cancel` sends SIGTERM to each stage still
/// outstanding and clears the flag; waiting then resumes. A failure of the
/// wait itself ends the loop with [`RunReport::ended_early`] set.
pub async fn reap<S: ProcessSupervisor>(
    supervisor: &mut S,
    handles: &[StageHandle],
    cancel: &CancelToken,
) -> RunReport {
    let mut outstanding: Vec<&StageHandle> = handles.iter().collect();
    let mut report = RunReport::default();

    while !outstanding.is_empty() {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::Cancel,
            reaped = supervisor.wait_any() => Event::Reaped(reaped),
        };

        match event {
            Event::Cancel => {
                if cancel.take() {
                    report.canceled = true;
                    for handle in &outstanding {
                        debug!("Sending SIGTERM to {} (PID {})", handle.name, handle.pid);
                        if let Err(e) = supervisor.terminate(handle.pid) {
                            warn!("Unable to terminate {} (PID {}): {}", handle.name, handle.pid, e);
                        }
                    }
                }
            }
            Event::Reaped(Ok(Some((pid, exit)))) => {
                let Some(index) = outstanding.iter().position(|h| h.pid == pid) else {
                    debug!("Reaped unknown PID {}", pid);
                    continue;
                };
                let handle = outstanding.remove(index);
                let outcome = StageOutcome::classify(exit);
                log_outcome(handle, outcome);
                report.record(handle, outcome);
            }
            Event::Reaped(Ok(None)) => {
                error!("{} stage(s) vanished before they could be reaped", outstanding.len());
                report.ended_early = true;
                break;
            }
            Event::Reaped(Err(e)) => {
                error!("Error waiting for pipeline stages: {}", e);
                report.ended_early = true;
                break;
            }
        }
    }

    report
}

fn log_outcome(handle: &StageHandle, outcome: StageOutcome) {
    match outcome {
        StageOutcome::Success => {
            debug!("PID {} ({}) exited with no errors.", handle.pid, handle.name)
        }
        StageOutcome::Failed(code) => {
            debug!("PID {} ({}) stopped with status {}!", handle.pid, handle.name, code)
        }
        StageOutcome::TerminatedByRequest => debug!(
            "PID {} ({}) was terminated normally with signal {}!",
            handle.pid, handle.name, SIGTERM
        ),
        StageOutcome::Crashed(signal) => {
            debug!("PID {} ({}) crashed on signal {}!", handle.pid, handle.name, signal)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::supervisor::{StageInput, StageOutput, StageSpec};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Supervisor whose stages "run" until the test finishes them or they
    /// are terminated.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeSupervisor {
        state: Arc<Mutex<FakeState>>,
        wake: Arc<Notify>,
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeState {
        next_pid: u32,
        pub spawned: Vec<(u32, StageSpec, bool, bool)>,
        pub terminated: Vec<u32>,
        running: HashMap<u32, ()>,
        exited: VecDeque<(u32, StageExit)>,
        pub fail_spawn_of: Option<StageRole>,
        pub fail_wait: bool,
    }

    impl FakeSupervisor {
        pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
            self.state.lock().unwrap()
        }

        /// Make the stage with `pid` end with `exit`.
        pub(crate) fn finish(&self, pid: u32, exit: StageExit) {
            let mut state = self.state();
            if state.running.remove(&pid).is_some() {
                state.exited.push_back((pid, exit));
            }
            drop(state);
            self.wake.notify_one();
        }

        pub(crate) fn running(&self) -> Vec<u32> {
            let mut pids: Vec<u32> = self.state().running.keys().copied().collect();
            pids.sort_unstable();
            pids
        }
    }

    impl ProcessSupervisor for FakeSupervisor {
        fn spawn(
            &mut self,
            spec: &StageSpec,
            stdin: StageInput,
            stdout: StageOutput,
        ) -> io::Result<u32> {
            let mut state = self.state();
            if state.fail_spawn_of == Some(spec.role) {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            state.next_pid += 1;
            let pid = 100 + state.next_pid;
            let piped_in = matches!(stdin, StageInput::Pipe(_));
            let piped_out = matches!(stdout, StageOutput::Pipe(_));
            state.spawned.push((pid, spec.clone(), piped_in, piped_out));
            state.running.insert(pid, ());
            Ok(pid)
        }

        async fn wait_any(&mut self) -> io::Result<Option<(u32, StageExit)>> {
            loop {
                let notified = self.wake.notified();
                {
                    let mut state = self.state();
                    if state.fail_wait {
                        return Err(io::Error::other("ECHILD"));
                    }
                    if let Some(exit) = state.exited.pop_front() {
                        return Ok(Some(exit));
                    }
                    if state.running.is_empty() {
                        return Ok(None);
                    }
                }
                notified.await;
            }
        }

        fn terminate(&mut self, pid: u32) -> io::Result<()> {
            let mut state = self.state();
            state.terminated.push(pid);
            if state.running.remove(&pid).is_some() {
                state.exited.push_back((pid, StageExit::Signaled(SIGTERM)));
            }
            drop(state);
            self.wake.notify_one();
            Ok(())
        }
    }

    fn handle(pid: u32, role: StageRole) -> StageHandle {
        StageHandle {
            pid,
            role,
            name: format!("{role:?}"),
        }
    }

    fn spawn_three(sup: &mut FakeSupervisor) -> Vec<StageHandle> {
        [StageRole::Conversion, StageRole::Rewriter, StageRole::Imposition]
            .into_iter()
            .map(|role| {
                let spec = StageSpec::new(role, "stage", "/bin/true", vec!["stage".into()]);
                let pid = sup
                    .spawn(&spec, StageInput::Inherit, StageOutput::Inherit)
                    .unwrap();
                handle(pid, role)
            })
            .collect()
    }

    #[test]
    fn test_classification() {
        assert_eq!(StageOutcome::classify(StageExit::Exited(0)), StageOutcome::Success);
        assert_eq!(StageOutcome::classify(StageExit::Exited(2)), StageOutcome::Failed(2));
        assert_eq!(
            StageOutcome::classify(StageExit::Signaled(15)),
            StageOutcome::TerminatedByRequest
        );
        assert_eq!(StageOutcome::classify(StageExit::Signaled(11)), StageOutcome::Crashed(11));
    }

    #[tokio::test]
    async fn test_all_success() {
        let mut sup = FakeSupervisor::default();
        let handles = spawn_three(&mut sup);
        for h in &handles {
            sup.finish(h.pid, StageExit::Exited(0));
        }
        let report = reap(&mut sup, &handles, &CancelToken::new()).await;
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.stages.len(), 3);
        assert!(report.last_failure.is_none());
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let mut sup = FakeSupervisor::default();
        let handles = spawn_three(&mut sup);
        sup.finish(handles[0].pid, StageExit::Exited(3));
        sup.finish(handles[1].pid, StageExit::Exited(0));
        sup.finish(handles[2].pid, StageExit::Signaled(11));

        let report = reap(&mut sup, &handles, &CancelToken::new()).await;
        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.exit_code, 11);
        assert_eq!(report.last_failure, Some(StageOutcome::Crashed(11)));
        assert_eq!(
            report.outcome_of(StageRole::Conversion),
            Some(StageOutcome::Failed(3))
        );
        assert!(sup.state().terminated.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_terminates_every_stage_once() {
        let mut sup = FakeSupervisor::default();
        let handles = spawn_three(&mut sup);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = reap(&mut sup, &handles, &cancel).await;
        assert!(report.canceled);
        assert!(!cancel.is_cancelled());
        assert_eq!(report.stages.len(), 3);
        assert!(report
            .stages
            .iter()
            .all(|s| s.outcome == StageOutcome::TerminatedByRequest));
        assert_eq!(report.last_failure, Some(StageOutcome::TerminatedByRequest));
        assert_eq!(report.exit_code, 0);

        let mut terminated = sup.state().terminated.clone();
        terminated.sort_unstable();
        let mut pids: Vec<u32> = handles.iter().map(|h| h.pid).collect();
        pids.sort_unstable();
        assert_eq!(terminated, pids);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_skips_reaped_stages() {
        let mut sup = FakeSupervisor::default();
        let handles = spawn_three(&mut sup);
        let cancel = CancelToken::new();
        sup.finish(handles[0].pid, StageExit::Exited(0));

        let trigger = cancel.clone();
        let observer = sup.clone();
        let first = handles[0].pid;
        tokio::spawn(async move {
            // cancel once the first stage has been reaped
            loop {
                let pending = observer.state().exited.iter().any(|(p, _)| *p == first);
                if !pending && observer.running().len() == 2 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            trigger.cancel();
        });

        let report = reap(&mut sup, &handles, &cancel).await;
        assert!(report.canceled);
        assert_eq!(report.outcome_of(StageRole::Conversion), Some(StageOutcome::Success));
        assert!(!sup.state().terminated.contains(&first));
        assert_eq!(sup.state().terminated.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_failure_ends_early() {
        let mut sup = FakeSupervisor::default();
        let handles = spawn_three(&mut sup);
        sup.state().fail_wait = true;
        let report = reap(&mut sup, &handles, &CancelToken::new()).await;
        assert!(report.ended_early);
        assert!(report.stages.is_empty());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_no_stages_is_immediate_success() {
        let mut sup = FakeSupervisor::default();
        let report = reap(&mut sup, &[], &CancelToken::new()).await;
        assert_eq!(report, RunReport::default());
    }
}
