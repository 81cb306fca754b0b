//! # pdftops-filter
//!
//! Print filter front-end that turns a PDF print job into printer-ready
//! PostScript by running a short pipeline of external converters.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      print file, or stdin buffered to a temp file
//!  ├─ 2. Sniff      pdftopdf hand-over comments (copies, collate)
//!  ├─ 3. Profile    language level, manufacturer, page size from the PPD
//!  ├─ 4. Plan       argv for conversion, rewriter and imposition stages
//!  ├─ 5. Spawn      pdftops|gs ─pipe─▶ [prolog rewriter] ─pipe─▶ pstops
//!  └─ 6. Reap       wait for all, forward SIGTERM, aggregate exit status
//! ```
//!
//! The post-processing stage only exists when the printer needs a firmware
//! workaround. It is this crate's own binary re-executed in
//! `--rewrite-prolog` mode.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdftops_filter::{run_filter, CancelToken, FilterConfig, JobRequest};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FilterConfig::builder().ppd_path("/etc/cups/ppd/laser.ppd").build()?;
//!     let job = JobRequest::new("laser", "42", "alice", "report", 1, "fit-to-page")
//!         .with_input("report.pdf");
//!     let report = run_filter(&job, &config, &CancelToken::new()).await?;
//!     std::process::exit(report.exit_code);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdftops` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod profile;
pub mod reaper;
pub mod supervisor;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::{listen_for_termination, CancelToken};
pub use config::{FilterConfig, FilterConfigBuilder, Renderer};
pub use error::FilterError;
pub use filter::{
    plan_pipeline, prepare, run_filter, run_filter_sync, run_filter_with, PipelinePlan,
    REWRITE_FLAG,
};
pub use job::JobRequest;
pub use orchestrator::Orchestrator;
pub use pipeline::quirks::QuirkFix;
pub use profile::DeviceProfile;
pub use reaper::{RunReport, StageOutcome};
pub use supervisor::{ChildSupervisor, ProcessSupervisor, StageRole, StageSpec};
