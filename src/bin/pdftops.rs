//! CLI binary for pdftops-filter.
//!
//! Invoked by the print scheduler as
//! `pdftops job user title copies options [file]`, with the destination
//! printer's name in argv[0]. Maps the environment onto `FilterConfig`, runs
//! the pipeline and exits with its aggregate status.
//!
//! The same binary is re-executed with `--rewrite-prolog <fixes>` to act as
//! the post-processing stage of its own pipeline.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pdftops_filter::config::{DEFAULT_GHOSTSCRIPT_PATH, DEFAULT_PDFTOPS_PATH, DEFAULT_SERVER_BIN};
use pdftops_filter::pipeline::input::resolve_input;
use pdftops_filter::pipeline::postprocess::rewrite_stdio;
use pdftops_filter::pipeline::quirks::parse_quirk_list;
use pdftops_filter::{prepare, run_filter_sync, FilterConfig, JobRequest, Renderer};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"ENVIRONMENT:
  PPD               printer description; selects language level, page size and workarounds
  CUPS_SERVERBIN    directory containing filter/pstops (default /usr/lib/cups)
  PDFTOPS_RENDERER  pdftops | gs
  RUST_LOG          log filter, e.g. RUST_LOG=warn

EXIT STATUS:
  0 on success, 1 on argument, input, pipe or spawn errors, otherwise the
  status (or signal number) of the last pipeline stage that failed.
"#;

const USAGE: &str = "pdftops [OPTIONS] JOB USER TITLE COPIES JOB_OPTIONS [FILE]\n       \
                     pdftops --rewrite-prolog FIXES";

/// Convert a PDF print job to PostScript for a CUPS queue.
#[derive(Parser, Debug)]
#[command(
    name = "pdftops",
    version,
    about = "Convert a PDF print job to PostScript for a CUPS queue",
    override_usage = USAGE,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Job id, user, title, copies, job options and an optional print file.
    ///
    /// Everything from the job id on is taken as given, so titles and user
    /// names may start with `-`.
    #[arg(value_name = "JOB_ARGS", trailing_var_arg = true, num_args = 0..)]
    job_args: Vec<String>,

    /// Printer description file.
    #[arg(long, env = "PPD", hide = true)]
    ppd: Option<PathBuf>,

    /// Directory containing `filter/pstops`.
    #[arg(long, env = "CUPS_SERVERBIN", default_value = DEFAULT_SERVER_BIN, hide = true)]
    server_bin: PathBuf,

    /// Conversion engine.
    #[arg(long, env = "PDFTOPS_RENDERER", value_enum, default_value = "pdftops", hide = true)]
    renderer: RendererArg,

    /// Path of Poppler's pdftops.
    #[arg(long, env = "PDFTOPS_PATH", default_value = DEFAULT_PDFTOPS_PATH, hide = true)]
    pdftops_path: PathBuf,

    /// Path of Ghostscript.
    #[arg(long, env = "GS_PATH", default_value = DEFAULT_GHOSTSCRIPT_PATH, hide = true)]
    gs_path: PathBuf,

    /// Run as the post-processing stage: inject the listed workarounds into
    /// standard input and write the result to standard output.
    #[arg(long, value_name = "FIXES", hide = true)]
    rewrite_prolog: Option<String>,

    /// Print the pipeline plan as JSON instead of running it.
    #[arg(long, hide = true)]
    dry_run: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RendererArg {
    Pdftops,
    Gs,
}

impl From<RendererArg> for Renderer {
    fn from(arg: RendererArg) -> Self {
        match arg {
            RendererArg::Pdftops => Renderer::Pdftops,
            RendererArg::Gs => Renderer::Ghostscript,
        }
    }
}

// ── Logging ──────────────────────────────────────────────────────────────────

/// Formats events as CUPS filter log lines: `LEVEL: message`.
struct CupsFormat;

impl<S, N> FormatEvent<S, N> for CupsFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let prefix = match *event.metadata().level() {
            Level::ERROR => "ERROR",
            Level::WARN => "WARNING",
            Level::INFO => "INFO",
            _ => "DEBUG",
        };
        write!(writer, "{prefix}: ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_logging(quiet: bool) {
    // the scheduler decides which DEBUG lines to keep, so emit them all
    let filter = if quiet { "warn" } else { "debug" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .event_format(CupsFormat)
        .init();
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(cli.quiet);

    if let Some(ids) = cli.rewrite_prolog.as_deref() {
        return run_rewriter(ids);
    }

    match run(&cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let job = build_job(cli)?;
    let config = build_config(cli)?;

    if cli.dry_run {
        let input = resolve_input(job.input_path()).context("Unable to resolve print file")?;
        let plan = prepare(&job, &config, &input)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(0);
    }

    let report = run_filter_sync(&job, &config).context("pdftops filter failed")?;
    if report.canceled {
        debug!("Job canceled, last outcome: {:?}", report.last_failure);
    }
    Ok(report.exit_code)
}

fn build_job(cli: &Cli) -> Result<JobRequest> {
    // the scheduler puts the queue name in argv[0]
    let printer = std::env::args_os()
        .next()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pdftops".to_string());

    let [job_id, user, title, copies, options, rest @ ..] = cli.job_args.as_slice() else {
        anyhow::bail!("Usage: pdftops job-id user title copies options [file]");
    };
    let file = match rest {
        [] => None,
        [file] => Some(PathBuf::from(file)),
        _ => anyhow::bail!("Usage: pdftops job-id user title copies options [file]"),
    };
    let copies: u32 = copies
        .trim()
        .parse()
        .with_context(|| format!("Invalid number of copies \"{copies}\""))?;

    let job = JobRequest::new(
        printer,
        job_id.as_str(),
        user.as_str(),
        title.as_str(),
        copies,
        options.as_str(),
    );
    Ok(match file {
        Some(path) => job.with_input(path),
        None => job,
    })
}

fn build_config(cli: &Cli) -> Result<FilterConfig> {
    let mut builder = FilterConfig::builder()
        .renderer(cli.renderer.into())
        .server_bin(&cli.server_bin)
        .pdftops_path(&cli.pdftops_path)
        .ghostscript_path(&cli.gs_path);
    if let Some(ppd) = &cli.ppd {
        builder = builder.ppd_path(ppd);
    }
    builder.build().context("Invalid filter configuration")
}

fn run_rewriter(ids: &str) -> ExitCode {
    let fixes = match parse_quirk_list(ids) {
        Ok(fixes) => fixes,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    match rewrite_stdio(&fixes) {
        Ok(outcome) => {
            debug!("Post-processing done: {:?}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Post-processing failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
