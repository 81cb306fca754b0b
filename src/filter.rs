//! Filter entry points: plan the pipeline for a job, run it, reap it.
//!
//! ## Steps
//!
//! 1. Resolve the input (buffer standard input to a temporary file if needed)
//! 2. Sniff `pdftopdf` hand-over comments from the document header
//! 3. Load the device profile from the PPD, if there is one
//! 4. Pick the printer workarounds for the manufacturer
//! 5. Build the argument vector of every stage
//! 6. Spawn the stages, then reap them all, forwarding cancellation
//!
//! Steps 2 to 5 are pure with respect to processes and are exposed as
//! [`prepare`] so the plan can be inspected without running anything.

use crate::cancel::{listen_for_termination, CancelToken};
use crate::config::FilterConfig;
use crate::error::FilterError;
use crate::job::JobRequest;
use crate::orchestrator::Orchestrator;
use crate::pipeline::input::{resolve_input, ResolvedInput};
use crate::pipeline::options::{imposition_args, JobOptions};
use crate::pipeline::quirks::{format_quirk_list, resolve_quirks, QuirkFix};
use crate::pipeline::render::conversion_args;
use crate::pipeline::sniff::{sniff_file, UpstreamMetadata};
use crate::profile::DeviceProfile;
use crate::reaper::RunReport;
use crate::supervisor::{ChildSupervisor, ProcessSupervisor, StageRole, StageSpec};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Hidden flag that runs the binary as the post-processing stage.
pub const REWRITE_FLAG: &str = "--rewrite-prolog";

/// Everything decided before the first process starts.
#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    /// Stages in pipeline order.
    pub stages: Vec<StageSpec>,
    pub quirks: Vec<QuirkFix>,
    pub upstream: Option<UpstreamMetadata>,
    pub profile: Option<DeviceProfile>,
    /// Option string handed to the imposition stage.
    pub imposition_options: String,
}

impl PipelinePlan {
    pub fn stage(&self, role: StageRole) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.role == role)
    }
}

/// Load the device profile named by the configuration.
///
/// A missing or unreadable PPD is not fatal: the conversion then runs
/// without device-specific flags.
pub fn load_profile(config: &FilterConfig, options: &JobOptions) -> Option<DeviceProfile> {
    let Some(path) = config.ppd_path.as_deref() else {
        debug!("No PPD file given, using converter defaults");
        return None;
    };
    match DeviceProfile::load(path, options) {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

/// Build the stage list for `job` reading from `input`.
pub fn plan_pipeline(
    job: &JobRequest,
    config: &FilterConfig,
    input: &Path,
    profile: Option<DeviceProfile>,
    upstream: Option<UpstreamMetadata>,
) -> Result<PipelinePlan, FilterError> {
    let options = job.parsed_options();
    let quirks = resolve_quirks(profile.as_ref().and_then(|p| p.manufacturer.as_deref()));

    let mut stages = vec![StageSpec::new(
        StageRole::Conversion,
        config.renderer.name(),
        config.converter_program(),
        conversion_args(config, profile.as_ref(), &options, input),
    )];

    if !quirks.is_empty() {
        debug!("Printer workarounds: {}", format_quirk_list(&quirks));
        stages.push(StageSpec::new(
            StageRole::Rewriter,
            "Post-processing",
            config.rewriter_program()?,
            vec![
                "pdftops".to_string(),
                REWRITE_FLAG.to_string(),
                format_quirk_list(&quirks),
            ],
        ));
    }

    let argv = imposition_args(job, upstream.as_ref());
    let imposition_options = argv.last().cloned().unwrap_or_default();
    stages.push(StageSpec::new(
        StageRole::Imposition,
        "pstops",
        config.imposition_program(),
        argv,
    ));

    Ok(PipelinePlan {
        stages,
        quirks,
        upstream,
        profile,
        imposition_options,
    })
}

/// Sniff, load the profile and plan, for an already resolved input.
pub fn prepare(
    job: &JobRequest,
    config: &FilterConfig,
    input: &ResolvedInput,
) -> Result<PipelinePlan, FilterError> {
    let upstream = sniff_file(input.path());
    let profile = load_profile(config, &job.parsed_options());
    plan_pipeline(job, config, input.path(), profile, upstream)
}

/// Run the filter for `job` with real child processes.
///
/// Returns the report of the reaped pipeline; its
/// [`RunReport::exit_code`] is the filter's exit status. Fatal errors
/// (unreadable input, pipe or spawn failure) are returned as `Err` and map
/// to exit status 1.
pub async fn run_filter(
    job: &JobRequest,
    config: &FilterConfig,
    cancel: &CancelToken,
) -> Result<RunReport, FilterError> {
    let input = resolve_input(job.input_path())?;
    run_filter_with(job, config, input, ChildSupervisor::new(), cancel).await
}

/// [`run_filter`] with an explicit input and process supervisor.
pub async fn run_filter_with<S: ProcessSupervisor>(
    job: &JobRequest,
    config: &FilterConfig,
    input: ResolvedInput,
    supervisor: S,
    cancel: &CancelToken,
) -> Result<RunReport, FilterError> {
    let plan = prepare(job, config, &input)?;

    let mut orchestrator = Orchestrator::new(supervisor);
    let spawned = orchestrator.spawn_all(&plan.stages);
    let report = orchestrator.reap(cancel).await;

    // the temporary copy outlives every stage that reads it
    if input.is_temporary() {
        debug!("Removing temporary file {}", input.path().display());
    }
    drop(input);

    spawned?;
    info!(
        "Pipeline finished: {} stage(s), exit status {}",
        report.stages.len(),
        report.exit_code
    );
    Ok(report)
}

/// Blocking entry point used by the binary.
///
/// Runs [`run_filter`] on a single-threaded runtime with a SIGTERM listener
/// installed, so that canceling the job terminates every stage.
pub fn run_filter_sync(job: &JobRequest, config: &FilterConfig) -> Result<RunReport, FilterError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| FilterError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(async {
            let cancel = CancelToken::new();
            let listener = listen_for_termination(cancel.clone()).map_err(|e| {
                FilterError::Internal(format!("Unable to install SIGTERM handler: {}", e))
            })?;
            let result = run_filter(job, config, &cancel).await;
            listener.abort();
            result
        })
}
