//! External sampler process
//!
//! The sampler is an opaque executable. It is configured by a JSON document
//! written to its stdin; closing stdin tells it to begin sampling. It keeps
//! running until interrupted.

use crate::config::SamplerSource;
use crate::error::SessionError;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// File name of the staged sampler executable
pub const SAMPLER_FILE_NAME: &str = "perf2";

/// perf_event_attr subset understood by the sampler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfAttr {
    pub sample_type: Vec<String>,
    pub wakeup_events: u32,
    pub freq: bool,
    pub exclude_host: bool,
    pub exclude_idle: bool,
    pub sample_freq: u64,
    pub config: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Document written to the sampler's stdin at start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPayload {
    pub attr: PerfAttr,
}

impl ControlPayload {
    /// Instruction-pointer samples driven by the hardware cycle counter,
    /// excluding host and idle time, woken on every sample.
    pub fn cpu_cycles(sample_freq_hz: u64) -> Self {
        Self {
            attr: PerfAttr {
                sample_type: vec!["PERF_SAMPLE_IP".to_string()],
                wakeup_events: 1,
                freq: true,
                exclude_host: true,
                exclude_idle: true,
                sample_freq: sample_freq_hz,
                config: "PERF_COUNT_HW_CPU_CYCLES".to_string(),
                event_type: "PERF_TYPE_HARDWARE".to_string(),
            },
        }
    }
}

/// Sampler executable copied into a private directory.
///
/// The directory is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedSampler {
    _dir: TempDir,
    path: PathBuf,
}

impl StagedSampler {
    /// Write the sampler image into a fresh temp directory, mode 0755
    pub fn stage(source: &SamplerSource) -> std::io::Result<Self> {
        let image = source.load()?;
        let dir = tempfile::Builder::new().prefix("gueststack-sampler").tempdir()?;
        let path = dir.path().join(SAMPLER_FILE_NAME);

        std::fs::write(&path, &image)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;

        debug!("Staged sampler ({} bytes) at {}", image.len(), path.display());
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Handle to a running sampler.
///
/// The child itself is owned by a detached reaper task whose only job is to
/// observe the exit and discard the status; its failures are not observable.
/// The reaper kills the child when asked to, or when this handle is dropped.
#[derive(Debug)]
pub struct RunningSampler {
    pid: Option<u32>,
    kill: oneshot::Sender<()>,
    reaper: JoinHandle<()>,
}

impl RunningSampler {
    /// Spawn the sampler, send it `payload` and close its stdin.
    ///
    /// If the payload cannot be delivered the child is killed before the
    /// error is returned.
    pub async fn spawn(path: &Path, payload: &[u8]) -> Result<Self, SessionError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        if let Err(e) = send_payload(&mut child, payload).await {
            let _ = child.kill().await;
            return Err(SessionError::ControlPayload(e));
        }

        let pid = child.id();
        let (kill, kill_rx) = oneshot::channel();
        let reaper = tokio::spawn(reap(child, kill_rx));

        Ok(Self { pid, kill, reaper })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// False once the reaper has observed the exit
    pub fn is_alive(&self) -> bool {
        !self.reaper.is_finished()
    }

    /// Ask the sampler to shut down gracefully
    pub fn interrupt(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        // the pid may already be reaped and reused
        if !self.is_alive() {
            return;
        }
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            debug!("SIGINT to sampler {} failed: {}", pid, e);
        }
    }

    /// Kill the sampler and wait for the reaper. Never fails.
    pub async fn terminate(self) {
        let _ = self.kill.send(());
        if let Err(e) = self.reaper.await {
            debug!("Sampler reaper ended abnormally: {}", e);
        }
    }
}

async fn send_payload(child: &mut Child, payload: &[u8]) -> std::io::Result<()> {
    let mut stdin = child.stdin.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sampler stdin not captured")
    })?;
    stdin.write_all(payload).await?;
    stdin.shutdown().await?;
    // dropping stdin closes the pipe, which starts sampling
    Ok(())
}

async fn reap(mut child: Child, kill_rx: oneshot::Receiver<()>) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => debug!("Sampler exited: {}", status),
            Err(e) => debug!("Waiting for sampler failed: {}", e),
        },
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                debug!("Killing sampler failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_control_payload_json() {
        let json = serde_json::to_value(ControlPayload::cpu_cycles(99)).unwrap();

        assert_eq!(json["attr"]["sample_type"], serde_json::json!(["PERF_SAMPLE_IP"]));
        assert_eq!(json["attr"]["wakeup_events"], 1);
        assert_eq!(json["attr"]["freq"], true);
        assert_eq!(json["attr"]["exclude_host"], true);
        assert_eq!(json["attr"]["exclude_idle"], true);
        assert_eq!(json["attr"]["sample_freq"], 99);
        assert_eq!(json["attr"]["config"], "PERF_COUNT_HW_CPU_CYCLES");
        assert_eq!(json["attr"]["type"], "PERF_TYPE_HARDWARE");
    }

    #[test]
    fn test_stage_writes_executable() {
        let source = SamplerSource::Bytes(Cow::Borrowed(&b"#!/bin/sh\nexit 0\n"[..]));
        let staged = StagedSampler::stage(&source).unwrap();

        let meta = std::fs::metadata(staged.path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"#!/bin/sh\nexit 0\n");

        let dir = staged.path().parent().unwrap().to_path_buf();
        drop(staged);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let err = RunningSampler::spawn(Path::new("/nonexistent/gueststack/perf2"), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_exited_sampler_is_not_alive() {
        let source = SamplerSource::Bytes(Cow::Borrowed(&b"#!/bin/sh\ncat > /dev/null\n"[..]));
        let staged = StagedSampler::stage(&source).unwrap();

        let running = RunningSampler::spawn(staged.path(), b"{}").await.unwrap();
        for _ in 0..200 {
            if !running.is_alive() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!running.is_alive());

        // interrupting and terminating an exited sampler is harmless
        running.interrupt();
        running.terminate().await;
    }
}
