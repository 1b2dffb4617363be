//! Symbol acquisition
//!
//! Builds the symbol tables used to resolve guest addresses: a kallsyms-style
//! dump read from disk, and the text symbols of a guest ELF image listed by
//! `nm`.

use crate::error::AcquireError;
use gueststack_shared::{SymbolTable, SymbolTables};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Where to load symbol tables from
#[derive(Debug, Clone, Default)]
pub struct SymbolSources {
    /// Guest `/proc/kallsyms` copy; used unfiltered
    pub kallsyms: Option<PathBuf>,

    /// Guest ELF image; only its text symbols are kept
    pub elf: Option<PathBuf>,
}

/// Name a table after the file it came from
pub fn table_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a kallsyms-style listing from disk
pub fn load_kallsyms(path: &Path) -> Result<SymbolTable, AcquireError> {
    let text = std::fs::read_to_string(path).map_err(|source| AcquireError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    SymbolTable::parse_str(&text).map_err(|source| AcquireError::Parse {
        origin: path.display().to_string(),
        source,
    })
}

/// List the defined text symbols of an ELF image with `nm -n`
pub async fn load_elf_symbols(elf: &Path) -> Result<SymbolTable, AcquireError> {
    let mut cmd = Command::new("nm");
    cmd.arg("-n").arg("--defined-only").arg(elf);
    read_symbols(&mut cmd, "nm").await
}

/// Run a tool that prints a symbol listing and keep its text symbols.
///
/// A non-zero exit turns the tool's stderr into the error message.
pub async fn read_symbols(cmd: &mut Command, tool: &str) -> Result<SymbolTable, AcquireError> {
    let output = cmd.output().await.map_err(|source| AcquireError::Launch {
        tool: tool.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(AcquireError::Process {
            tool: tool.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let table = SymbolTable::read(output.stdout.as_slice()).map_err(|source| AcquireError::Parse {
        origin: tool.to_string(),
        source,
    })?;
    Ok(table.text_only())
}

/// Load every configured source, kallsyms first.
///
/// A bad kallsyms file is fatal. An ELF image that cannot be listed is
/// reported and skipped.
pub async fn load_tables(sources: &SymbolSources) -> Result<SymbolTables, AcquireError> {
    let mut tables = SymbolTables::new();

    if let Some(path) = &sources.kallsyms {
        info!("Reading symbols from {}", path.display());
        tables.push(table_name(path), load_kallsyms(path)?);
    }

    if let Some(elf) = &sources.elf {
        info!("Fetching symbols from ELF image {}", elf.display());
        match load_elf_symbols(elf).await {
            Ok(table) => tables.push(table_name(elf), table),
            Err(e) => warn!("Cannot read {} with nm -n: {}", elf.display(), e),
        }
    }

    for named in tables.iter() {
        info!("Fetched {} symbols from {}", named.table.len(), named.name);
    }
    Ok(tables)
}
