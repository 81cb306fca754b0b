//! Read the hand-over comments `pdftopdf` leaves in the PDF header.
//!
//! When `pdftopdf` runs before this filter it has already applied page
//! management (N-up, page ranges, mirroring, …) and possibly the copies. It
//! records that in comment lines right after the `%PDF` header:
//!
//! ```text
//! %PDF-1.4
//! %%PDFTOPDFNumCopies : 2
//! %%PDFTOPDFCollate : true
//! ```
//!
//! Only a small window after the header is examined, so sniffing a large
//! document costs a handful of line reads.

use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, error};

/// Number of lines after the `%PDF` header searched for directives.
pub const MAX_CHECK_COMMENT_LINES: usize = 20;

/// Longest line read at once. Longer lines arrive as several chunks, each
/// counting as a line.
pub const MAX_LINE_LEN: u64 = 4096;

const PDF_HEADER: &[u8] = b"%PDF";
const COPIES_DIRECTIVE: &str = "%%PDFTOPDFNumCopies";
const COLLATE_DIRECTIVE: &str = "%%PDFTOPDFCollate";
const GENERATED_MARKER: &str = "% This file was generated by pdftopdf";

/// What an upstream `pdftopdf` left behind for us.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpstreamMetadata {
    /// Copies the printer itself has to produce. `None` when the directive was
    /// missing or unreadable.
    pub copies: Option<u32>,
    /// The printer collates copies in hardware.
    pub collate: bool,
    /// `pdftopdf` ran on this document.
    pub applied: bool,
}

/// Sniff the print file at `path`.
///
/// A file that cannot be opened is reported and treated as carrying no
/// metadata; the conversion stage will report the real problem.
pub fn sniff_file(path: &Path) -> Option<UpstreamMetadata> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("pdftops - cannot open print file \"{}\": {}", path.display(), e);
            return None;
        }
    };

    let meta = sniff_reader(BufReader::new(file));
    match &meta {
        Some(m) => debug!(
            "pdftopdf already applied: copies={:?} collate={}",
            m.copies, m.collate
        ),
        None => debug!("No pdftopdf directives in \"{}\"", path.display()),
    }
    meta
}

/// Sniff any buffered reader. Reading stops at the first I/O error.
pub fn sniff_reader<R: BufRead>(mut reader: R) -> Option<UpstreamMetadata> {
    let lines = std::iter::from_fn(move || {
        let mut line = Vec::new();
        match reader.by_ref().take(MAX_LINE_LEN).read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    });
    parse_directives(lines)
}

/// Parse directive lines from a lazy sequence of raw lines.
///
/// Skips to the `%PDF` header, then looks at the next
/// [`MAX_CHECK_COMMENT_LINES`] lines. Directives may come in any order and
/// repeat; the last one wins. Returns `None` when nothing was found.
pub fn parse_directives<I, L>(lines: I) -> Option<UpstreamMetadata>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    let mut lines = lines.into_iter();
    lines.by_ref().find(|l| l.as_ref().starts_with(PDF_HEADER))?;

    let mut meta = UpstreamMetadata::default();
    for raw in lines.take(MAX_CHECK_COMMENT_LINES) {
        let text = String::from_utf8_lossy(raw.as_ref());
        let line = text.trim_end_matches(['\r', '\n']);

        if let Some(rest) = line.strip_prefix(COPIES_DIRECTIVE) {
            meta.applied = true;
            if let Some(copies) = directive_value(rest).and_then(|v| v.trim().parse().ok()) {
                meta.copies = Some(copies);
            }
        } else if let Some(rest) = line.strip_prefix(COLLATE_DIRECTIVE) {
            meta.applied = true;
            if let Some(value) = directive_value(rest) {
                meta.collate = value
                    .get(..4)
                    .is_some_and(|v| v.eq_ignore_ascii_case("true"));
            }
        } else if line == GENERATED_MARKER {
            meta.applied = true;
        }
    }

    meta.applied.then_some(meta)
}

/// Text after the `:` with leading blanks removed.
fn directive_value(rest: &str) -> Option<&str> {
    rest.split_once(':')
        .map(|(_, value)| value.trim_start_matches([' ', '\t']))
}
