//! Control interface exposed by the gueststack kernel module
//!
//! The module creates one directory in debugfs:
//!
//! - `stackNN`: per-CPU sample buffer. Reading returns the raw dump, writing
//!   any bytes empties it.
//! - `total_eventsNN` / `relevant_eventsNN`: per-CPU u64 event counters.
//! - `relevant_addr`: write-only list of `<low>-<high>` hex ranges the
//!   sampler keeps stacks for.

use crate::error::SessionError;
use gueststack_shared::AddrRange;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STACK_PREFIX: &str = "stack";
pub const TOTAL_PREFIX: &str = "total";
pub const RELEVANT_EVENTS_PREFIX: &str = "relevant_events";
pub const RELEVANT_ADDR_FILE: &str = "relevant_addr";

/// Bytes written into a sample buffer to empty it
pub const RESET_TOKEN: &str = "reset";

/// Control files discovered under the debugfs root
#[derive(Debug, Clone, Default)]
pub struct ControlFiles {
    pub stacks: Vec<PathBuf>,
    pub totals: Vec<PathBuf>,
    pub relevant_events: Vec<PathBuf>,
    pub relevant_addr: Option<PathBuf>,
}

impl ControlFiles {
    /// Scan `root` for control files. Each list is sorted by file name.
    pub fn discover(root: &Path) -> Result<Self, SessionError> {
        let entries = std::fs::read_dir(root).map_err(|e| SessionError::io("read dir", root, e))?;

        let mut files = ControlFiles::default();
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::io("read dir", root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let path = entry.path();

            if name == RELEVANT_ADDR_FILE {
                files.relevant_addr = Some(path);
            } else if name.starts_with(STACK_PREFIX) {
                files.stacks.push(path);
            } else if name.starts_with(TOTAL_PREFIX) {
                files.totals.push(path);
            } else if name.starts_with(RELEVANT_EVENTS_PREFIX) {
                files.relevant_events.push(path);
            }
        }

        files.stacks.sort();
        files.totals.sort();
        files.relevant_events.sort();

        debug!(
            "Discovered {} stack buffers, {} counters in {}",
            files.stacks.len(),
            files.totals.len() + files.relevant_events.len(),
            root.display()
        );
        Ok(files)
    }

    /// Every counter file, totals first
    pub fn counters(&self) -> impl Iterator<Item = &PathBuf> {
        self.totals.iter().chain(self.relevant_events.iter())
    }
}

/// Write `data` into an existing control file with a single write.
///
/// Control files are never created. A plain file (as used in tests) that was
/// longer than `data` is trimmed to `keep` bytes afterwards; debugfs files
/// report a zero length and are left alone.
pub fn dump(path: &Path, data: &[u8], keep: u64) -> Result<(), SessionError> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| SessionError::io("open", path, e))?;
    file.write_all(data)
        .map_err(|e| SessionError::io("write", path, e))?;

    let len = file
        .metadata()
        .map_err(|e| SessionError::io("stat", path, e))?
        .len();
    if len > keep {
        file.set_len(keep)
            .map_err(|e| SessionError::io("truncate", path, e))?;
    }
    Ok(())
}

/// Empty a sample buffer
pub fn reset_buffer(path: &Path) -> Result<(), SessionError> {
    dump(path, RESET_TOKEN.as_bytes(), 0)
}

/// Zero an event counter
pub fn reset_counter(path: &Path) -> Result<(), SessionError> {
    dump(path, b"0\n", 2)
}

/// Replace the relevant address ranges, one `low-high` line per range
pub fn write_relevant_ranges(path: &Path, ranges: &[AddrRange]) -> Result<(), SessionError> {
    let body: String = ranges.iter().map(|r| format!("{}\n", r)).collect();
    dump(path, body.as_bytes(), body.len() as u64)
}

/// Read a u64 counter file. Missing or garbled content counts as zero.
pub async fn read_counter(path: &Path) -> Result<u64, SessionError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SessionError::io("read", path, e))?;
    Ok(text.trim().parse().unwrap_or(0))
}
