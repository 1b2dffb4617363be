//! Opt-in source line annotation
//!
//! When enabled, the sampled instruction pointer of every stack is looked up
//! with `addr2line -fe <elf>` and appended to its collapsed line as the
//! function name (if it adds anything) and the `file:line` location. Results
//! are cached per address for the life of the process.

use crate::cache::ResolveCache;
use crate::error::ServeError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// addr2line result for one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Function name, `None` when addr2line did not know it
    pub function: Option<String>,

    /// `file:line` basename, or the hex address when unknown
    pub location: String,
}

impl Annotation {
    /// Interpret `addr2line -f` output: function on the first line,
    /// `path:line` on the second.
    pub fn from_addr2line(address: u64, output: &str) -> Self {
        let mut lines = output.lines();
        let function = lines.next().unwrap_or("");
        let location = lines.next().unwrap_or("");

        if function.is_empty() || function.contains("??") {
            return Self {
                function: None,
                location: format!("{:x}", address),
            };
        }

        let location = Path::new(location)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{:x}", address));
        Self {
            function: Some(function.to_string()),
            location,
        }
    }
}

/// Resolves instruction pointers to source locations in one ELF image
#[derive(Debug)]
pub struct LineAnnotator {
    elf: PathBuf,
    tool: String,
    cache: ResolveCache<u64, Annotation>,
}

impl LineAnnotator {
    pub fn new(elf: impl Into<PathBuf>) -> Self {
        Self::with_tool(elf, "addr2line")
    }

    /// Use a different addr2line-compatible executable
    pub fn with_tool(elf: impl Into<PathBuf>, tool: impl Into<String>) -> Self {
        Self {
            elf: elf.into(),
            tool: tool.into(),
            cache: ResolveCache::new(),
        }
    }

    /// Look up `address`, running the tool at most once per address
    pub fn annotate(&self, address: u64) -> Result<Annotation, ServeError> {
        self.cache.get_or_compute(address, |&address| self.run(address))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn run(&self, address: u64) -> Result<Annotation, ServeError> {
        debug!("Resolving {:#x} with {}", address, self.tool);
        let output = Command::new(&self.tool)
            .arg("-fe")
            .arg(&self.elf)
            .arg(format!("{:x}", address))
            .output()
            .map_err(|source| ServeError::Launch {
                tool: self.tool.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ServeError::Process {
                tool: self.tool.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(Annotation::from_addr2line(
            address,
            &String::from_utf8_lossy(&output.stdout),
        ))
    }
}
