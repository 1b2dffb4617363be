//! Stack aggregation
//!
//! Folds captured stacks into the collapsed-stack text format read by flame
//! graph renderers:
//!
//! ```text
//! outer:kallsyms;middle:kallsyms;inner:guest.elf; 1
//! ```
//!
//! Every frame is `<symbol>:<table>;`, outermost first. Each captured stack
//! produces its own line with a count of 1; identical lines are not merged.

use crate::annotate::LineAnnotator;
use crate::error::ServeError;
use gueststack_shared::{Stack, SymbolTables};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Placeholder served instead of a flame graph when nothing was captured
pub const NO_SAMPLES: &str = "No samples yet";

/// Share of samples that carried at least one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Relevance {
    /// Stacks with at least one frame
    pub relevant: usize,

    /// All stacks, including empty ones
    pub total: usize,
}

impl Relevance {
    pub fn of(stacks: &[Stack]) -> Self {
        Self {
            relevant: stacks.iter().filter(|s| s.has_frames()).count(),
            total: stacks.len(),
        }
    }

    /// `relevant / total`, or 0 when there are no samples
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.relevant as f64 / self.total as f64
    }
}

/// Used as the flame graph title
impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}% relevant ({}/{})",
            100.0 * self.ratio(),
            self.relevant,
            self.total
        )
    }
}

/// What a collapse pass wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollapseSummary {
    pub lines: usize,
    pub frames: usize,
}

/// Write one collapsed line per stack with frames.
///
/// Frames are resolved through `tables` in priority order; addresses no
/// table knows are written as `UNKNOWN:`. Write errors abort the pass.
pub fn collapse<W: Write>(
    out: &mut W,
    stacks: &[Stack],
    tables: &SymbolTables,
) -> std::io::Result<CollapseSummary> {
    let mut summary = CollapseSummary::default();
    for stack in stacks.iter().filter(|s| s.has_frames()) {
        summary.frames += write_frames(out, stack, tables)?;
        out.write_all(b" 1\n")?;
        summary.lines += 1;
    }
    Ok(summary)
}

fn write_frames<W: Write>(out: &mut W, stack: &Stack, tables: &SymbolTables) -> std::io::Result<usize> {
    let mut frames = 0;
    for addr in stack.frames_outermost_first() {
        let (table, sym) = tables.resolve(addr);
        write!(out, "{}:{};", sym.name, table.unwrap_or(""))?;
        frames += 1;
    }
    Ok(frames)
}

/// Symbol name of the innermost frame
fn innermost_symbol(stack: &Stack, tables: &SymbolTables) -> Option<String> {
    let addr = *stack.frames.first()?;
    Some(tables.resolve(addr).1.name)
}

/// Collapses stacks against a fixed set of symbol tables, optionally
/// extending each line with the source location of the sampled RIP.
#[derive(Debug)]
pub struct Collapser {
    tables: Arc<SymbolTables>,
    annotator: Option<LineAnnotator>,
}

impl Collapser {
    pub fn new(tables: Arc<SymbolTables>) -> Self {
        Self {
            tables,
            annotator: None,
        }
    }

    /// Append `addr2line` results for each stack's RIP. The function name
    /// is skipped when it repeats the innermost frame's symbol.
    pub fn with_annotator(mut self, annotator: LineAnnotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn tables(&self) -> &SymbolTables {
        &self.tables
    }

    pub fn collapse<W: Write>(&self, out: &mut W, stacks: &[Stack]) -> Result<CollapseSummary, ServeError> {
        let Some(annotator) = &self.annotator else {
            return Ok(collapse(out, stacks, &self.tables)?);
        };

        let mut summary = CollapseSummary::default();
        for stack in stacks.iter().filter(|s| s.has_frames()) {
            summary.frames += write_frames(out, stack, &self.tables)?;

            let annotation = annotator.annotate(stack.rip)?;
            if let Some(function) = &annotation.function {
                if innermost_symbol(stack, &self.tables).as_deref() != Some(function.as_str()) {
                    write!(out, "{};", function)?;
                }
            }
            write!(out, "{};", annotation.location)?;

            out.write_all(b" 1\n")?;
            summary.lines += 1;
        }
        Ok(summary)
    }
}
