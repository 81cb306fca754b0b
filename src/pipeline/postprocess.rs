//! Post-processing: inject printer workarounds into the PostScript prolog.
//!
//! The stream is copied byte for byte except for one insertion. The
//! workaround block has to run before any procedure definitions, so it goes
//! directly after `%%BeginProlog`. Converters do not always write a prolog
//! section, so the first of these DSC markers decides what happens:
//!
//! | First marker | Action |
//! |--------------|--------|
//! | `%%BeginProlog` | echo it, then the block |
//! | `%%EndProlog` | synthesize `%%BeginProlog`, block, then the marker |
//! | `%%BeginSetup` / `%%Page:` | synthesize a whole prolog around the block, then the marker |
//! | none | copy unchanged |
//!
//! The rewriter works on raw byte lines; PostScript output may contain
//! binary data and need not be valid UTF-8. After the insertion point the
//! remainder is streamed with [`std::io::copy`] and never split into lines.

use crate::pipeline::quirks::{injection_lines, QuirkFix};
use std::io::{self, BufRead, Write};

const BEGIN_PROLOG: &[u8] = b"%%BeginProlog";
const END_PROLOG: &[u8] = b"%%EndProlog";
const BEGIN_SETUP: &[u8] = b"%%BeginSetup";
const PAGE: &[u8] = b"%%Page:";

/// What the rewriter did with a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The block was inserted after an existing `%%BeginProlog`.
    Injected,
    /// A prolog section was synthesized to hold the block.
    Synthesized,
    /// The block was already present after `%%BeginProlog`.
    AlreadyPresent,
    /// No structural marker was found; the stream passed through unchanged.
    NoPrologMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    BeginProlog,
    EndProlog,
    BeginSetup,
    Page,
}

impl Marker {
    fn classify(line: &[u8]) -> Option<Self> {
        if line.starts_with(BEGIN_PROLOG) {
            Some(Marker::BeginProlog)
        } else if line.starts_with(END_PROLOG) {
            Some(Marker::EndProlog)
        } else if line.starts_with(BEGIN_SETUP) {
            Some(Marker::BeginSetup)
        } else if line.starts_with(PAGE) {
            Some(Marker::Page)
        } else {
            None
        }
    }
}

enum State {
    /// Before the first marker: lines are echoed.
    Copying,
    /// After `%%BeginProlog`: the first `matched` lines equal the start of
    /// the block and are held back until we know whether it is a repeat.
    InjectAfterOpen { matched: usize, held: Vec<Vec<u8>> },
    /// Insertion done; everything else is copied.
    Tail(RewriteOutcome),
}

/// Copy `input` to `output`, injecting the workaround block for `fixes`.
///
/// With no fixes the stream is copied unchanged.
pub fn rewrite_stream<R, W>(
    mut input: R,
    mut output: W,
    fixes: &[QuirkFix],
) -> io::Result<RewriteOutcome>
where
    R: BufRead,
    W: Write,
{
    if fixes.is_empty() {
        io::copy(&mut input, &mut output)?;
        output.flush()?;
        return Ok(RewriteOutcome::NoPrologMarker);
    }

    let block = injection_lines(fixes);
    let mut state = State::Copying;
    let mut line = Vec::new();

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }

        state = match state {
            State::Copying => match Marker::classify(&line) {
                None => {
                    output.write_all(&line)?;
                    State::Copying
                }
                Some(Marker::BeginProlog) => {
                    output.write_all(&line)?;
                    State::InjectAfterOpen {
                        matched: 0,
                        held: Vec::new(),
                    }
                }
                Some(marker) => {
                    synthesize_prolog(&mut output, &block, marker)?;
                    output.write_all(&line)?;
                    State::Tail(RewriteOutcome::Synthesized)
                }
            },
            State::InjectAfterOpen { matched, mut held } => {
                if trim_eol(&line) == block[matched].as_bytes() {
                    held.push(line.clone());
                    if matched + 1 == block.len() {
                        write_held(&mut output, &held)?;
                        State::Tail(RewriteOutcome::AlreadyPresent)
                    } else {
                        State::InjectAfterOpen {
                            matched: matched + 1,
                            held,
                        }
                    }
                } else {
                    write_block(&mut output, &block)?;
                    write_held(&mut output, &held)?;
                    output.write_all(&line)?;
                    State::Tail(RewriteOutcome::Injected)
                }
            }
            State::Tail(outcome) => State::Tail(outcome),
        };

        if matches!(state, State::Tail(_)) {
            break;
        }
    }

    let outcome = match state {
        State::Copying => RewriteOutcome::NoPrologMarker,
        State::InjectAfterOpen { held, .. } => {
            // input ended inside a partial match
            write_block(&mut output, &block)?;
            write_held(&mut output, &held)?;
            RewriteOutcome::Injected
        }
        State::Tail(outcome) => {
            io::copy(&mut input, &mut output)?;
            outcome
        }
    };
    output.flush()?;
    Ok(outcome)
}

/// Run the rewriter as a pipeline stage: standard input to standard output.
pub fn rewrite_stdio(fixes: &[QuirkFix]) -> io::Result<RewriteOutcome> {
    let stdin = io::stdin().lock();
    let stdout = io::BufWriter::new(io::stdout().lock());
    rewrite_stream(stdin, stdout, fixes)
}

fn synthesize_prolog<W: Write>(output: &mut W, block: &[&str], found: Marker) -> io::Result<()> {
    output.write_all(BEGIN_PROLOG)?;
    output.write_all(b"\n")?;
    write_block(output, block)?;
    if found != Marker::EndProlog {
        output.write_all(END_PROLOG)?;
        output.write_all(b"\n")?;
    }
    Ok(())
}

fn write_block<W: Write>(output: &mut W, block: &[&str]) -> io::Result<()> {
    for line in block {
        output.write_all(line.as_bytes())?;
        output.write_all(b"\n")?;
    }
    Ok(())
}

fn write_held<W: Write>(output: &mut W, held: &[Vec<u8>]) -> io::Result<()> {
    held.iter().try_for_each(|line| output.write_all(line))
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
