//! Server configuration

use anyhow::Context;
use gueststack_agent::SymbolSources;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Listen address used when none is given; host-less means all interfaces
pub const DEFAULT_LISTEN_ADDR: &str = ":8080";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` or `:port`
    pub listen_addr: String,

    /// Symbol tables to resolve frames against
    pub symbols: SymbolSources,

    /// External `flamegraph.pl`-compatible renderer; inferno when unset
    pub flamegraph_script: Option<PathBuf>,

    /// Append `addr2line` locations of each sampled RIP to collapsed stacks
    pub annotate_lines: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            symbols: SymbolSources::default(),
            flamegraph_script: None,
            annotate_lines: false,
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.annotate_lines && self.symbols.elf.is_none() {
            anyhow::bail!("Line annotation needs an ELF image (--elf)");
        }

        if let Some(script) = &self.flamegraph_script {
            if !script.is_file() {
                anyhow::bail!("Flame graph script {} does not exist", script.display());
            }
        }

        self.socket_addr()?;
        Ok(())
    }

    /// Resolve the listen address, binding all interfaces for `:port`
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        };

        addr.to_socket_addrs()
            .with_context(|| format!("Invalid listen address {}", self.listen_addr))?
            .next()
            .with_context(|| format!("Listen address {} resolves to nothing", self.listen_addr))
    }
}
