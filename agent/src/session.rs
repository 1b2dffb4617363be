//! Sampling session controller
//!
//! Owns the lifecycle of the sampler subprocess and the shared control files
//! (sample buffers, event counters, relevant address ranges).

use crate::config::SessionConfig;
use crate::debugfs::{self, ControlFiles, RELEVANT_ADDR_FILE};
use crate::error::SessionError;
use crate::sampler::{ControlPayload, RunningSampler, StagedSampler};
use gueststack_shared::{parse_stacks, AddrRange, Stack, SymbolTables};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Controller state
#[derive(Debug, Default)]
enum SamplerState {
    #[default]
    Idle,
    Running(RunningSampler),
    Stopping,
    Resetting,
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Sampling,
    Stopping,
    Resetting,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Sampling => "sampling",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Resetting => "resetting",
        };
        f.write_str(s)
    }
}

/// Event counters summed over all CPUs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounters {
    pub total: u64,
    pub relevant: u64,
}

/// Controller for one sampler and its control files.
///
/// `start`, `stop` and `reset` are serialized against each other, so a start
/// issued while a stop is in flight runs after it. `status` never waits for
/// a control operation.
#[derive(Debug)]
pub struct SamplingSession {
    root_dir: PathBuf,
    files: ControlFiles,
    relevant_ranges: Vec<AddrRange>,
    sampler: StagedSampler,
    payload: String,
    stop_grace: Duration,
    state: Mutex<SamplerState>,
    control: tokio::sync::Mutex<()>,
}

impl SamplingSession {
    /// Discover the control files, compute one relevant range per non-empty
    /// symbol table and stage the sampler executable.
    pub fn new(config: &SessionConfig, tables: &SymbolTables) -> Result<Self, SessionError> {
        let files = ControlFiles::discover(&config.root_dir)?;
        let relevant_ranges = tables.relevant_ranges();
        let sampler = StagedSampler::stage(&config.sampler).map_err(SessionError::Staging)?;
        let payload = serde_json::to_string_pretty(&ControlPayload::cpu_cycles(config.sample_freq_hz))
            .map_err(|e| SessionError::ControlPayload(e.into()))?;

        info!(
            "Session on {} with {} stack buffers and {} relevant ranges",
            config.root_dir.display(),
            files.stacks.len(),
            relevant_ranges.len()
        );

        Ok(Self {
            root_dir: config.root_dir.clone(),
            files,
            relevant_ranges,
            sampler,
            payload,
            stop_grace: config.stop_grace,
            state: Mutex::new(SamplerState::Idle),
            control: tokio::sync::Mutex::new(()),
        })
    }

    fn state(&self) -> MutexGuard<'_, SamplerState> {
        lock_state(&self.state)
    }

    /// Start sampling, restarting the sampler if it is already running
    pub async fn start(&self) -> Result<(), SessionError> {
        let _control = self.control.lock().await;
        self.stop_locked().await;

        let running = RunningSampler::spawn(self.sampler.path(), self.payload.as_bytes()).await?;
        info!("Sampler started (pid {:?})", running.pid());
        *self.state() = SamplerState::Running(running);
        Ok(())
    }

    /// Stop sampling. Succeeds trivially when nothing is running.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let _control = self.control.lock().await;
        self.stop_locked().await;
        Ok(())
    }

    /// SIGINT, grace period, SIGKILL, wait. Leaves the session idle.
    async fn stop_locked(&self) {
        let running = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, SamplerState::Stopping) {
                SamplerState::Running(running) => running,
                _ => {
                    *state = SamplerState::Idle;
                    return;
                }
            }
        };

        // a cancelled stop drops `running`, whose reaper then kills the child
        let _idle = IdleOnDrop(&self.state);

        debug!("Stopping sampler (pid {:?})", running.pid());
        running.interrupt();
        tokio::time::sleep(self.stop_grace).await;
        running.terminate().await;
        info!("Sampler stopped");
    }

    /// Stop sampling, empty every sample buffer, zero the event counters and
    /// rewrite the relevant address ranges.
    ///
    /// The first failure aborts the sequence; files already reset stay reset.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let _control = self.control.lock().await;
        self.stop_locked().await;

        *self.state() = SamplerState::Resetting;
        let result = {
            let _idle = IdleOnDrop(&self.state);
            self.reset_files()
        };

        if result.is_ok() {
            info!("Reset {} stack buffers", self.files.stacks.len());
        }
        result
    }

    fn reset_files(&self) -> Result<(), SessionError> {
        for path in &self.files.stacks {
            debugfs::reset_buffer(path)?;
        }
        for path in self.files.counters() {
            debugfs::reset_counter(path)?;
        }

        let relevant_addr = self
            .files
            .relevant_addr
            .clone()
            .unwrap_or_else(|| self.root_dir.join(RELEVANT_ADDR_FILE));
        debugfs::write_relevant_ranges(&relevant_addr, &self.relevant_ranges)
    }

    /// Parse every sample buffer into one list of stacks, in buffer order.
    ///
    /// Any read or parse failure discards everything collected so far.
    pub async fn read_stacks(&self) -> Result<Vec<Stack>, SessionError> {
        let mut stacks = Vec::new();
        for path in &self.files.stacks {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| SessionError::io("read", path, e))?;
            stacks = parse_stacks(data.as_slice(), stacks).map_err(|source| SessionError::Parse {
                path: path.clone(),
                source,
            })?;
        }

        debug!(
            "Read {} stacks from {} buffers",
            stacks.len(),
            self.files.stacks.len()
        );
        Ok(stacks)
    }

    /// Sum the per-CPU event counters
    pub async fn read_counters(&self) -> Result<EventCounters, SessionError> {
        let mut counters = EventCounters::default();
        for path in &self.files.totals {
            counters.total += debugfs::read_counter(path).await?;
        }
        for path in &self.files.relevant_events {
            counters.relevant += debugfs::read_counter(path).await?;
        }
        Ok(counters)
    }

    pub fn status(&self) -> SessionStatus {
        match &*self.state() {
            SamplerState::Idle => SessionStatus::Idle,
            SamplerState::Running(running) if running.is_alive() => SessionStatus::Sampling,
            // exited on its own
            SamplerState::Running(_) => SessionStatus::Idle,
            SamplerState::Stopping => SessionStatus::Stopping,
            SamplerState::Resetting => SessionStatus::Resetting,
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.status() == SessionStatus::Sampling
    }

    pub fn relevant_ranges(&self) -> &[AddrRange] {
        &self.relevant_ranges
    }

    pub fn control_files(&self) -> &ControlFiles {
        &self.files
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn sampler_path(&self) -> &Path {
        self.sampler.path()
    }
}

fn lock_state(state: &Mutex<SamplerState>) -> MutexGuard<'_, SamplerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Puts the session back to `Idle` when dropped, including when the
/// operation holding it is cancelled mid-way.
struct IdleOnDrop<'a>(&'a Mutex<SamplerState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *lock_state(self.0) = SamplerState::Idle;
    }
}
