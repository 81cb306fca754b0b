//! Printer firmware workarounds, selected by manufacturer.
//!
//! Some PostScript interpreters choke on perfectly valid output:
//!
//! | Manufacturer | Problem | Fix |
//! |--------------|---------|-----|
//! | Kyocera | `bind` applied early in the prolog fails on some models | redefine `bind` as a no-op |
//! | Brother | `currenthalftone` / `sethalftone` round-trip errors | answer `null`, ignore `null` |
//!
//! Each fix is a short block of PostScript injected right after
//! `%%BeginProlog` by [`crate::pipeline::postprocess`].

use crate::error::FilterError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// First line of every injected block.
pub const INJECTION_HEADER: &str = "% ===== Workaround insertion by pdftops filter =====";

/// Last line of every injected block.
pub const INJECTION_FOOTER: &str = "% =====";

/// One compatibility fix for the generated PostScript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuirkFix {
    /// Kyocera: make `bind` a no-op.
    NeutralizeBind,
    /// Brother: make the halftone query harmless.
    NeutralizeHalftoneQuery,
}

/// Manufacturer prefix → fixes. Matched case-insensitively.
const QUIRK_TABLE: &[(&str, &[QuirkFix])] = &[
    ("Kyocera", &[QuirkFix::NeutralizeBind]),
    ("Brother", &[QuirkFix::NeutralizeHalftoneQuery]),
];

impl QuirkFix {
    /// Stable identifier, used on the rewriter stage's command line.
    pub fn id(&self) -> &'static str {
        match self {
            QuirkFix::NeutralizeBind => "neutralize-bind",
            QuirkFix::NeutralizeHalftoneQuery => "neutralize-halftone-query",
        }
    }

    /// PostScript lines of the fix, without the header and footer. Leading
    /// `%` lines explain the fix to whoever reads a captured job.
    pub fn snippet(&self) -> &'static [&'static str] {
        match self {
            QuirkFix::NeutralizeBind => &[
                "% Kyocera's PostScript interpreter crashes on early name binding,",
                "% so eliminate all \"bind\"s by redefining \"bind\" to no-op",
                "/bind {} bind def",
            ],
            QuirkFix::NeutralizeHalftoneQuery => &[
                "% Brother's PostScript interpreter spits out the current page",
                "% and aborts the job on the \"currenthalftone\" operator, so redefine",
                "% it to null",
                "/currenthalftone {//null} bind def",
                "/orig.sethalftone systemdict /sethalftone get def",
                "/sethalftone {dup //null eq not {//orig.sethalftone}{pop} ifelse} bind def",
            ],
        }
    }
}

impl fmt::Display for QuirkFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for QuirkFix {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [QuirkFix::NeutralizeBind, QuirkFix::NeutralizeHalftoneQuery]
            .into_iter()
            .find(|q| q.id() == s)
            .ok_or_else(|| FilterError::UnknownQuirk(s.to_string()))
    }
}

/// Fixes required for a device made by `manufacturer`.
///
/// An empty result means the pipeline has no post-processing stage.
pub fn resolve_quirks(manufacturer: Option<&str>) -> Vec<QuirkFix> {
    let Some(manufacturer) = manufacturer else {
        return Vec::new();
    };
    QUIRK_TABLE
        .iter()
        .filter(|(prefix, _)| {
            manufacturer
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
        .flat_map(|(_, fixes)| fixes.iter().copied())
        .collect()
}

/// The complete block injected into the prolog: header, every fix's
/// snippet in order, footer.
pub fn injection_lines(fixes: &[QuirkFix]) -> Vec<&'static str> {
    let mut lines = vec![INJECTION_HEADER];
    lines.extend(fixes.iter().flat_map(|f| f.snippet().iter().copied()));
    lines.push(INJECTION_FOOTER);
    lines
}

/// Comma-separated ids, the inverse of [`parse_quirk_list`].
pub fn format_quirk_list(fixes: &[QuirkFix]) -> String {
    fixes.iter().map(QuirkFix::id).collect::<Vec<_>>().join(",")
}

/// Parse a comma-separated id list. Empty entries are skipped.
pub fn parse_quirk_list(ids: &str) -> Result<Vec<QuirkFix>, FilterError> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::parse)
        .collect()
}
