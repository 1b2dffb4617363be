use anyhow::Result;
use gueststack_agent::sampler::ControlPayload;
use gueststack_agent::{EventCounters, SamplerSource, SamplingSession, SessionConfig, SessionError, SessionStatus};
use gueststack_shared::{SymbolTable, SymbolTables};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Stands in for the real sampler: records its control payload next to
/// itself and then idles until killed.
const FAKE_SAMPLER: &[u8] = b"#!/bin/sh\ncat > \"$0.payload\"\nexec sleep 30\n";

/// Exits as soon as the control payload has been read.
const SHORT_LIVED_SAMPLER: &[u8] = b"#!/bin/sh\ncat > /dev/null\n";

fn fake_debugfs() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "stack00",
        "stack01",
        "total_events00",
        "total_events01",
        "relevant_events00",
        "relevant_events01",
        "relevant_addr",
    ] {
        fs::write(dir.path().join(name), "").unwrap();
    }
    dir
}

fn tables() -> SymbolTables {
    let mut tables = SymbolTables::new();
    tables.push("kallsyms", SymbolTable::parse_str("1000 T foo\n2000 t bar\n").unwrap());
    tables.push(
        "guest.elf",
        SymbolTable::parse_str("ffffffffc0000000 t mod_init\nffffffffc0001000 T mod_exit\n").unwrap(),
    );
    tables
}

fn session(root: &Path, sampler: &'static [u8]) -> SamplingSession {
    let config = SessionConfig {
        root_dir: root.to_path_buf(),
        sampler: SamplerSource::Bytes(Cow::Borrowed(sampler)),
        ..SessionConfig::default()
    };
    SamplingSession::new(&config, &tables()).unwrap()
}

fn payload_path(session: &SamplingSession) -> PathBuf {
    let mut path = session.sampler_path().as_os_str().to_owned();
    path.push(".payload");
    PathBuf::from(path)
}

async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_start_sends_payload_and_stop_goes_idle() -> Result<()> {
    let root = fake_debugfs();
    let session = session(root.path(), FAKE_SAMPLER);

    session.start().await?;
    assert_eq!(session.status(), SessionStatus::Sampling);

    let payload = payload_path(&session);
    assert!(
        wait_for(|| fs::read_to_string(&payload).map(|s| s.ends_with('}')).unwrap_or(false)).await
    );
    let sent: ControlPayload = serde_json::from_str(&fs::read_to_string(&payload)?)?;
    assert_eq!(sent, ControlPayload::cpu_cycles(99));

    session.stop().await?;
    assert_eq!(session.status(), SessionStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_start_restarts_running_sampler() -> Result<()> {
    let root = fake_debugfs();
    let session = session(root.path(), FAKE_SAMPLER);

    session.start().await?;
    session.start().await?;
    assert!(session.is_sampling());

    session.stop().await?;
    assert!(!session.is_sampling());
    Ok(())
}

#[tokio::test]
async fn test_stop_twice_and_before_start() -> Result<()> {
    let root = fake_debugfs();
    let session = session(root.path(), FAKE_SAMPLER);

    session.stop().await?;
    session.stop().await?;

    session.start().await?;
    session.stop().await?;
    session.stop().await?;
    assert_eq!(session.status(), SessionStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_stop_leaves_session_idle() -> Result<()> {
    let root = fake_debugfs();
    let config = SessionConfig {
        root_dir: root.path().to_path_buf(),
        sampler: SamplerSource::Bytes(Cow::Borrowed(FAKE_SAMPLER)),
        stop_grace: Duration::from_secs(1),
        ..SessionConfig::default()
    };
    let session = SamplingSession::new(&config, &tables())?;

    session.start().await?;
    // gives up during the grace period
    let cancelled = tokio::time::timeout(Duration::from_millis(1), session.stop()).await;
    assert!(cancelled.is_err());
    assert_eq!(session.status(), SessionStatus::Idle);

    session.start().await?;
    assert!(session.is_sampling());
    session.stop().await?;
    assert_eq!(session.status(), SessionStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_sampler_exiting_on_its_own_reads_as_idle() -> Result<()> {
    let root = fake_debugfs();
    let session = session(root.path(), SHORT_LIVED_SAMPLER);

    session.start().await?;
    assert!(wait_for(|| session.status() == SessionStatus::Idle).await);

    // stopping an already exited sampler is not an error
    session.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_spawn_failure_leaves_session_idle() {
    let root = fake_debugfs();
    let session = session(root.path(), b"#!/nonexistent/gueststack/interpreter\n");

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::Spawn { .. }));
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_read_stacks_chains_buffers_in_order() -> Result<()> {
    let root = fake_debugfs();
    fs::write(root.path().join("stack00"), "CPU:0 RIP: 1000\n1500\n")?;
    fs::write(root.path().join("stack01"), "CPU:1 RIP: 2000\nCPU:1 RIP: 2100\n2500\n2600\n")?;
    let session = session(root.path(), FAKE_SAMPLER);

    let stacks = session.read_stacks().await?;
    let shape: Vec<(u32, u64, usize)> = stacks.iter().map(|s| (s.cpu, s.rip, s.frames.len())).collect();
    assert_eq!(shape, vec![(0, 0x1000, 1), (1, 0x2000, 0), (1, 0x2100, 2)]);
    Ok(())
}

#[tokio::test]
async fn test_read_stacks_discards_everything_on_bad_buffer() {
    let root = fake_debugfs();
    fs::write(root.path().join("stack00"), "CPU:0 RIP: 1000\n1500\n").unwrap();
    fs::write(root.path().join("stack01"), "1500\n").unwrap();
    let session = session(root.path(), FAKE_SAMPLER);

    let err = session.read_stacks().await.unwrap_err();
    assert!(matches!(err, SessionError::Parse { .. }));
}

#[tokio::test]
async fn test_reset_empties_buffers_and_writes_ranges() -> Result<()> {
    let root = fake_debugfs();
    fs::write(root.path().join("stack00"), "CPU:0 RIP: 1000\n1500\n")?;
    fs::write(root.path().join("stack01"), "CPU:1 RIP: 2000\n")?;
    fs::write(root.path().join("total_events00"), "17\n")?;
    fs::write(root.path().join("relevant_events01"), "4\n")?;
    let session = session(root.path(), FAKE_SAMPLER);

    assert_eq!(session.read_stacks().await?.len(), 2);
    assert_eq!(session.read_counters().await?.total, 17);
    assert_eq!(session.read_counters().await?.relevant, 4);

    session.start().await?;
    session.reset().await?;

    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(session.read_stacks().await?.is_empty());
    assert_eq!(session.read_counters().await?, EventCounters::default());
    assert_eq!(
        fs::read_to_string(root.path().join("relevant_addr"))?,
        "1000-2000\nffffffffc0000000-ffffffffc0001000\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_reset_without_relevant_addr_fails() {
    let root = fake_debugfs();
    fs::remove_file(root.path().join("relevant_addr")).unwrap();
    fs::write(root.path().join("stack00"), "CPU:0 RIP: 1000\n").unwrap();
    let session = session(root.path(), FAKE_SAMPLER);

    let err = session.reset().await.unwrap_err();
    assert!(matches!(err, SessionError::Io { .. }));
    // buffers reset before the failure stay reset
    assert_eq!(fs::read_to_string(root.path().join("stack00")).unwrap(), "");
}
