//! Configuration for a filter run.
//!
//! Everything the filter needs to know about its *environment* lives in
//! [`FilterConfig`]: which converter to run and where it is installed, where
//! the imposition filter lives, which PPD describes the printer, and which
//! executable implements the post-processing stage. Job-specific input (user,
//! title, options) lives in [`crate::job::JobRequest`] instead.
//!
//! Build it with [`FilterConfig::builder()`] and set only what differs from
//! the compiled-in defaults.

use crate::error::FilterError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Compiled-in location of the CUPS server binaries (`$CUPS_SERVERBIN`).
pub const DEFAULT_SERVER_BIN: &str = "/usr/lib/cups";

/// Compiled-in location of Poppler's `pdftops`.
pub const DEFAULT_PDFTOPS_PATH: &str = "/usr/bin/pdftops";

/// Compiled-in location of Ghostscript.
pub const DEFAULT_GHOSTSCRIPT_PATH: &str = "/usr/bin/gs";

/// Configuration for one run of the filter.
///
/// Built via [`FilterConfig::builder()`] or using [`FilterConfig::default()`].
///
/// # Example
/// ```rust
/// use pdftops_filter::{FilterConfig, Renderer};
///
/// let config = FilterConfig::builder()
///     .renderer(Renderer::Ghostscript)
///     .server_bin("/opt/cups/lib")
///     .build()
///     .unwrap();
/// assert!(config.imposition_program().ends_with("filter/pstops"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Which engine turns the PDF into PostScript. Default: [`Renderer::Pdftops`].
    pub renderer: Renderer,

    /// Path of the Poppler `pdftops` executable.
    pub pdftops_path: PathBuf,

    /// Path of the Ghostscript executable.
    pub ghostscript_path: PathBuf,

    /// Directory holding `filter/pstops`. Default: [`DEFAULT_SERVER_BIN`].
    pub server_bin: PathBuf,

    /// Use Ghostscript's `ps2write` device; `false` selects the older
    /// `pswrite`. Ignored for `pdftops`. Default: true.
    pub ps2write: bool,

    /// The converter can keep each page at its own size (`pdftops
    /// -origpagesizes`). Requested whenever the job does not ask for
    /// fit-to-page. Default: true.
    pub native_page_sizes: bool,

    /// Executable that runs the post-processing stage in `--rewrite-prolog`
    /// mode. `None` means the currently running binary.
    pub rewriter_program: Option<PathBuf>,

    /// PPD file describing the destination printer (`$PPD`).
    pub ppd_path: Option<PathBuf>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            renderer: Renderer::default(),
            pdftops_path: PathBuf::from(DEFAULT_PDFTOPS_PATH),
            ghostscript_path: PathBuf::from(DEFAULT_GHOSTSCRIPT_PATH),
            server_bin: PathBuf::from(DEFAULT_SERVER_BIN),
            ps2write: true,
            native_page_sizes: true,
            rewriter_program: None,
            ppd_path: None,
        }
    }
}

impl FilterConfig {
    /// Create a new builder for `FilterConfig`.
    pub fn builder() -> FilterConfigBuilder {
        FilterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Executable of the conversion stage for the selected renderer.
    pub fn converter_program(&self) -> &Path {
        match self.renderer {
            Renderer::Pdftops => &self.pdftops_path,
            Renderer::Ghostscript => &self.ghostscript_path,
        }
    }

    /// Executable of the imposition stage: `<server_bin>/filter/pstops`.
    pub fn imposition_program(&self) -> PathBuf {
        self.server_bin.join("filter").join("pstops")
    }

    /// Executable of the post-processing stage.
    pub fn rewriter_program(&self) -> Result<PathBuf, FilterError> {
        match &self.rewriter_program {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                FilterError::Internal(format!("cannot locate own executable: {e}"))
            }),
        }
    }
}

/// Builder for [`FilterConfig`].
#[derive(Debug)]
pub struct FilterConfigBuilder {
    config: FilterConfig,
}

impl FilterConfigBuilder {
    pub fn renderer(mut self, renderer: Renderer) -> Self {
        self.config.renderer = renderer;
        self
    }

    pub fn pdftops_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdftops_path = path.into();
        self
    }

    pub fn ghostscript_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ghostscript_path = path.into();
        self
    }

    pub fn server_bin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.server_bin = dir.into();
        self
    }

    pub fn ps2write(mut self, v: bool) -> Self {
        self.config.ps2write = v;
        self
    }

    pub fn native_page_sizes(mut self, v: bool) -> Self {
        self.config.native_page_sizes = v;
        self
    }

    pub fn rewriter_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rewriter_program = Some(path.into());
        self
    }

    pub fn ppd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ppd_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FilterConfig, FilterError> {
        let c = &self.config;
        if c.converter_program().as_os_str().is_empty() {
            return Err(FilterError::InvalidConfig(format!(
                "no executable configured for renderer '{}'",
                c.renderer.name()
            )));
        }
        if c.server_bin.as_os_str().is_empty() {
            return Err(FilterError::InvalidConfig(
                "server bin directory must not be empty".into(),
            ));
        }
        if matches!(&c.ppd_path, Some(p) if p.as_os_str().is_empty()) {
            return Err(FilterError::InvalidConfig(
                "PPD path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// PDF-to-PostScript engine used for the conversion stage.
///
/// The two engines take different command lines and have different
/// capabilities: only `pdftops` can keep mixed page sizes, and only
/// Ghostscript knows about the Brother CCITT workaround.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    /// Poppler's `pdftops`. (default)
    #[default]
    Pdftops,
    /// Ghostscript with the `ps2write`/`pswrite` device.
    #[serde(rename = "gs")]
    Ghostscript,
}

impl Renderer {
    /// Program name used as argv[0] and in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Renderer::Pdftops => "pdftops",
            Renderer::Ghostscript => "gs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_cups_locations() {
        let c = FilterConfig::default();
        assert_eq!(c.renderer, Renderer::Pdftops);
        assert_eq!(c.converter_program(), Path::new(DEFAULT_PDFTOPS_PATH));
        assert_eq!(
            c.imposition_program(),
            PathBuf::from("/usr/lib/cups/filter/pstops")
        );
        assert!(c.native_page_sizes);
    }

    #[test]
    fn server_bin_override_moves_pstops() {
        let c = FilterConfig::builder()
            .server_bin("/opt/cups")
            .build()
            .unwrap();
        assert_eq!(c.imposition_program(), PathBuf::from("/opt/cups/filter/pstops"));
    }

    #[test]
    fn ghostscript_selects_gs_path() {
        let c = FilterConfig::builder()
            .renderer(Renderer::Ghostscript)
            .ghostscript_path("/usr/local/bin/gs")
            .build()
            .unwrap();
        assert_eq!(c.converter_program(), Path::new("/usr/local/bin/gs"));
        assert_eq!(c.renderer.name(), "gs");
    }

    #[test]
    fn empty_paths_are_rejected() {
        let err = FilterConfig::builder().pdftops_path("").build().unwrap_err();
        assert!(matches!(err, FilterError::InvalidConfig(_)));

        let err = FilterConfig::builder().server_bin("").build().unwrap_err();
        assert!(matches!(err, FilterError::InvalidConfig(_)));
    }

    #[test]
    fn explicit_rewriter_program_wins() {
        let c = FilterConfig::builder()
            .rewriter_program("/usr/libexec/pdftops")
            .build()
            .unwrap();
        assert_eq!(
            c.rewriter_program().unwrap(),
            PathBuf::from("/usr/libexec/pdftops")
        );
    }

    #[test]
    fn renderer_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Renderer::Pdftops).unwrap(), "\"pdftops\"");
        assert_eq!(serde_json::to_string(&Renderer::Ghostscript).unwrap(), "\"gs\"");
    }
}
