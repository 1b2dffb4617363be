//! gueststack
//!
//! Samples a guest kernel through the gueststack debugfs interface and serves
//! the captured stacks as flame graphs over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use gueststack_agent::config::{DEFAULT_ROOT_DIR, DEFAULT_SAMPLE_FREQ_HZ};
use gueststack_agent::{load_tables, SamplerSource, SamplingSession, SessionConfig, SymbolSources};
use gueststack_aggregator::annotate::LineAnnotator;
use gueststack_aggregator::config::{ServerConfig, DEFAULT_LISTEN_ADDR};
use gueststack_aggregator::server::{http, AppState};
use gueststack_aggregator::{Collapser, Renderer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gueststack")]
#[command(about = "Guest kernel CPU sampler with flame graph UI", long_about = None)]
#[command(version)]
struct Args {
    /// Guest /proc/kallsyms copy
    #[arg(long, env = "GUESTSTACK_KALLSYMS")]
    kallsyms: Option<PathBuf>,

    /// Guest ELF image; its text symbols are listed with `nm -n`
    #[arg(long, env = "GUESTSTACK_ELF")]
    elf: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "GUESTSTACK_HTTP", default_value = DEFAULT_LISTEN_ADDR)]
    http: String,

    /// gueststack debugfs directory
    #[arg(long, env = "GUESTSTACK_ROOT_DIR", default_value = DEFAULT_ROOT_DIR)]
    root_dir: PathBuf,

    /// Sampler executable (default: the embedded sampler, or `perf2`)
    #[arg(long, env = "GUESTSTACK_SAMPLER")]
    sampler: Option<PathBuf>,

    /// Sampling frequency in Hz
    #[arg(long, env = "GUESTSTACK_SAMPLE_FREQ", default_value_t = DEFAULT_SAMPLE_FREQ_HZ)]
    sample_freq: u64,

    /// Time between SIGINT and SIGKILL when stopping the sampler (e.g. "10ms")
    #[arg(long, env = "GUESTSTACK_STOP_GRACE", default_value = "10ms")]
    stop_grace: String,

    /// flamegraph.pl-compatible script (default: render with inferno)
    #[arg(long, env = "GUESTSTACK_FLAMEGRAPH")]
    flamegraph: Option<PathBuf>,

    /// Append addr2line locations of each sampled RIP (needs --elf)
    #[arg(long, env = "GUESTSTACK_ANNOTATE_LINES")]
    annotate_lines: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose)?;
    info!("Configuration: {:?}", args);

    let session_config = SessionConfig {
        root_dir: args.root_dir.clone(),
        sampler: args
            .sampler
            .clone()
            .map(SamplerSource::Path)
            .unwrap_or_default(),
        sample_freq_hz: args.sample_freq,
        stop_grace: gueststack_shared::utils::parse_duration(&args.stop_grace)
            .context("Failed to parse stop grace period")?,
    };
    session_config.validate()?;

    let server_config = ServerConfig {
        listen_addr: args.http.clone(),
        symbols: SymbolSources {
            kallsyms: args.kallsyms.clone(),
            elf: args.elf.clone(),
        },
        flamegraph_script: args.flamegraph.clone(),
        annotate_lines: args.annotate_lines,
    };
    server_config.validate()?;

    if !nix::unistd::Uid::effective().is_root() {
        warn!("Not running as root. The debugfs control files usually require root.");
    }

    run(session_config, server_config).await
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}

async fn run(session_config: SessionConfig, server_config: ServerConfig) -> Result<()> {
    let tables = load_tables(&server_config.symbols)
        .await
        .context("Bad kallsyms file")?;
    if tables.is_empty() {
        warn!("No symbol tables loaded; every frame will be UNKNOWN");
    }

    let session = SamplingSession::new(&session_config, &tables)
        .context("Failed to open the gueststack control files")?;
    info!("Reset {}", session_config.root_dir.display());
    session.reset().await.context("Initial reset failed")?;
    let session = Arc::new(session);

    let mut collapser = Collapser::new(Arc::new(tables));
    if server_config.annotate_lines {
        if let Some(elf) = &server_config.symbols.elf {
            collapser = collapser.with_annotator(LineAnnotator::new(elf));
        }
    }

    let renderer = Renderer::from_script(server_config.flamegraph_script.clone());
    info!("Rendering flame graphs with {}", renderer.name());

    let state = Arc::new(AppState::new(session.clone(), Arc::new(collapser), renderer));
    let addr = server_config.socket_addr()?;
    info!("Open your browser on http://{}:{}", state.hostname, addr.port());

    http::serve(addr, state, shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down, stopping sampler");
    session.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
