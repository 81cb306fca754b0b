//! Job option parsing and the imposition stage's command line.
//!
//! Job options arrive as one flat string in CUPS syntax:
//! `name=value` pairs and bare boolean names separated by whitespace, where a
//! bare `name` means `true` and `noname` means `name=false`. Values may be
//! quoted (`page-label="Top Secret"`) or be `{…}` collections.
//!
//! The imposition filter (`pstops`) receives the same string minus every
//! option that the conversion stage (or an upstream `pdftopdf`) has already
//! applied, since applying them twice rotates or scales the job twice.

use crate::job::JobRequest;
use crate::pipeline::sniff::UpstreamMetadata;

/// Options already applied by the conversion stage's page geometry flags.
/// Always removed from the imposition stage's options.
pub const GEOMETRY_OPTIONS: &[&str] = &[
    "fitplot",
    "fit-to-page",
    "landscape",
    "orientation-requested",
];

/// Options already applied by an upstream `pdftopdf`. Removed only when the
/// input carries evidence that `pdftopdf` ran.
pub const PAGE_MANAGEMENT_OPTIONS: &[&str] = &[
    "brightness",
    "Collate",
    "cupsEvenDuplex",
    "gamma",
    "hue",
    "ipp-attribute-fidelity",
    "MirrorPrint",
    "mirror",
    "multiple-document-handling",
    "natural-scaling",
    "number-up",
    "number-up-layout",
    "OutputOrder",
    "page-border",
    "page-bottom",
    "page-label",
    "page-left",
    "page-ranges",
    "page-right",
    "page-set",
    "page-top",
    "position",
    "saturation",
    "scaling",
];

/// Parsed job options with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    entries: Vec<(String, String)>,
}

impl JobOptions {
    /// Parse a CUPS option string. Later occurrences of a name win.
    pub fn parse(options: &str) -> Self {
        let mut entries = Vec::new();
        for token in split_tokens(options) {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, unquote(value)),
                None => match strip_no_prefix(token) {
                    Some(name) => (name, "false".to_string()),
                    None => (token, "true".to_string()),
                },
            };
            if !name.is_empty() {
                entries.push((name.to_string(), value));
            }
        }
        Self { entries }
    }

    /// Value of `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Tri-state boolean: `None` when absent, `Some(false)` for
    /// `no`/`off`/`false` (any case), `Some(true)` for anything else.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| !is_false(v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `no`, `off` and `false` in any case.
pub fn is_false(value: &str) -> bool {
    ["no", "off", "false"]
        .iter()
        .any(|f| value.eq_ignore_ascii_case(f))
}

/// Remove every occurrence of the listed options from `options`.
///
/// An option is removed together with its `=value` and a leading `no`
/// boolean prefix. Names match case-insensitively and only as a whole option
/// name: `number-up` does not remove `number-up-layout=lrtb`. The remaining
/// options are re-joined with single spaces.
pub fn remove_options(options: &str, names: &[&str]) -> String {
    split_tokens(options)
        .into_iter()
        .filter(|token| !names.iter().any(|name| token_names(token, name)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The option string handed to `pstops`.
pub fn imposition_options(options: &str, upstream: Option<&UpstreamMetadata>) -> String {
    let mut remaining = remove_options(options, GEOMETRY_OPTIONS);

    if let Some(meta) = upstream.filter(|m| m.applied) {
        remaining = remove_options(&remaining, PAGE_MANAGEMENT_OPTIONS);

        // pdftopdf found out that the printer collates in hardware
        if meta.collate {
            if !remaining.is_empty() {
                remaining.push(' ');
            }
            remaining.push_str("Collate");
        }
    }

    remaining
}

/// Full argument vector for `pstops`, argv[0] included:
/// `printer job user title copies options`.
///
/// When `pdftopdf` already ran it also produced the copies, so the copy count
/// it left in the file (1 when it left none) replaces the job's.
pub fn imposition_args(job: &JobRequest, upstream: Option<&UpstreamMetadata>) -> Vec<String> {
    let copies = match upstream.filter(|m| m.applied) {
        Some(meta) => meta.copies.unwrap_or(1),
        None => job.copies,
    };

    vec![
        job.printer.clone(),
        job.job_id.clone(),
        job.user.clone(),
        job.title.clone(),
        copies.to_string(),
        imposition_options(&job.options, upstream),
    ]
}

// ── Tokenising ───────────────────────────────────────────────────────────

/// Split an option string on unquoted whitespace.
fn split_tokens(options: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut escaped = false;

    for (i, c) in options.char_indices() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\'' | '"' if quote.is_none() => quote = Some(c),
            _ if quote == Some(c) => quote = None,
            '{' if quote.is_none() => depth += 1,
            '}' if quote.is_none() => depth = depth.saturating_sub(1),
            _ if c.is_whitespace() && quote.is_none() && depth == 0 => {
                if let Some(s) = start.take() {
                    tokens.push(&options[s..i]);
                }
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(&options[s..]);
    }
    tokens
}

fn unquote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut quote: Option<char> = None;
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '\'' | '"' if quote.is_none() => quote = Some(c),
            _ if quote == Some(c) => quote = None,
            _ => out.push(c),
        }
    }
    out
}

fn strip_no_prefix(name: &str) -> Option<&str> {
    match name.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("no") && name.len() > 2 => name.get(2..),
        _ => None,
    }
}

/// Does `token` set (or negate) the option `name`?
fn token_names(token: &str, name: &str) -> bool {
    let key = token.split_once('=').map_or(token, |(key, _)| key);
    key.eq_ignore_ascii_case(name)
        || strip_no_prefix(key).is_some_and(|rest| rest.eq_ignore_ascii_case(name))
}
