//! Per-job decisions made before any process starts, plus the rewriter that
//! runs as a stage of its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ sniff ──▶ quirks ──▶ render / options ──▶ (stages)
//! (file)   (header)  (vendor)    (argv per stage)     postprocess
//! ```
//!
//! 1. [`input`]: resolve the print file or buffer standard input
//! 2. [`sniff`]: read what an upstream `pdftopdf` already applied
//! 3. [`quirks`]: pick firmware workarounds by manufacturer
//! 4. [`render`]: command line of the conversion stage
//! 5. [`options`]: option parsing and the imposition stage's command line
//! 6. [`postprocess`]: the prolog rewriter run by the post-processing stage

pub mod input;
pub mod options;
pub mod postprocess;
pub mod quirks;
pub mod render;
pub mod sniff;
