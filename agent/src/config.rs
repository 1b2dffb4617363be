//! Configuration types for the sampling session

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

/// Debugfs directory created by the gueststack kernel module
pub const DEFAULT_ROOT_DIR: &str = "/sys/kernel/debug/gueststack";

/// Sampling frequency written into the sampler control payload
pub const DEFAULT_SAMPLE_FREQ_HZ: u64 = 99;

/// How long the sampler gets to exit after SIGINT before it is killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(10);

/// Where the sampler executable comes from before it is staged
#[derive(Debug, Clone)]
pub enum SamplerSource {
    /// Executable image held in memory
    Bytes(Cow<'static, [u8]>),

    /// Executable read from disk when the session is created
    Path(PathBuf),
}

impl SamplerSource {
    /// The sampler compiled into this binary.
    ///
    /// Requires `GUESTSTACK_SAMPLER_BIN` to name the sampler at build time.
    #[cfg(feature = "embed-sampler")]
    pub fn embedded() -> Self {
        SamplerSource::Bytes(Cow::Borrowed(&include_bytes!(env!("GUESTSTACK_SAMPLER_BIN"))[..]))
    }

    /// Load the executable image
    pub fn load(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match self {
            SamplerSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_ref())),
            SamplerSource::Path(path) => std::fs::read(path).map(Cow::Owned),
        }
    }
}

impl Default for SamplerSource {
    #[cfg(feature = "embed-sampler")]
    fn default() -> Self {
        SamplerSource::embedded()
    }

    #[cfg(not(feature = "embed-sampler"))]
    fn default() -> Self {
        SamplerSource::Path(PathBuf::from("perf2"))
    }
}

/// Sampling session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Control-interface directory holding `stack*`, `total*` and `relevant_addr`
    pub root_dir: PathBuf,

    /// Sampler executable to stage and run
    pub sampler: SamplerSource,

    /// Sampling frequency in Hz
    pub sample_freq_hz: u64,

    /// Grace period between SIGINT and SIGKILL when stopping
    pub stop_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            sampler: SamplerSource::default(),
            sample_freq_hz: DEFAULT_SAMPLE_FREQ_HZ,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl SessionConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_freq_hz == 0 {
            anyhow::bail!("Sample frequency must be greater than 0");
        }

        if self.sample_freq_hz > 10000 {
            anyhow::bail!("Sample frequency too high (max 10000 Hz)");
        }

        if self.root_dir.as_os_str().is_empty() {
            anyhow::bail!("Control directory must not be empty");
        }

        if self.stop_grace > Duration::from_secs(5) {
            anyhow::bail!("Stop grace period too long (max 5s)");
        }

        Ok(())
    }
}
