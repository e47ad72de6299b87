//! Configuration for the orchestrator and its background maintenance.
//!
//! Every knob lives in [`BotConfig`], built via [`BotConfigBuilder`]. The
//! defaults are what a single-process deployment wants; tests shorten the
//! timers and point the staging directory at a temp dir.
//!
//! `build()` rejects zero timers and a session sweep interval longer than
//! the idle timeout it enforces.

use crate::error::BotError;
use crate::progress::{NoopObserver, SharedObserver};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runtime configuration for [`crate::orchestrator::Orchestrator`].
///
/// # Example
/// ```rust
/// use docbot::BotConfig;
/// use std::time::Duration;
///
/// let config = BotConfig::builder()
///     .staging_dir("/tmp/docbot-test")
///     .session_idle_timeout(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct BotConfig {
    /// Flat directory holding every staged artifact. Default: `$TMPDIR/docbot-staging`.
    pub staging_dir: PathBuf,

    /// Idle time after which a session is discarded. Default: 30 min.
    pub session_idle_timeout: Duration,

    /// How often expired sessions are evicted. Default: 5 min.
    pub session_sweep_interval: Duration,

    /// Age after which an artifact is deleted by the sweep. Default: 1 h.
    ///
    /// Must exceed the slowest engine call, otherwise a file could be swept
    /// while an operation is still reading it.
    pub artifact_retention: Duration,

    /// How often the staging directory is swept. Default: 30 min.
    pub artifact_sweep_interval: Duration,

    /// Largest attachment accepted from a user. Default: 20 MiB.
    pub max_upload_bytes: u64,

    /// Event hook. Default: [`NoopObserver`].
    pub observer: SharedObserver,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("docbot-staging"),
            session_idle_timeout: Duration::from_secs(30 * 60),
            session_sweep_interval: Duration::from_secs(5 * 60),
            artifact_retention: Duration::from_secs(60 * 60),
            artifact_sweep_interval: Duration::from_secs(30 * 60),
            max_upload_bytes: 20 * 1024 * 1024,
            observer: Arc::new(NoopObserver),
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("staging_dir", &self.staging_dir)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("session_sweep_interval", &self.session_sweep_interval)
            .field("artifact_retention", &self.artifact_retention)
            .field("artifact_sweep_interval", &self.artifact_sweep_interval)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("observer", &"<dyn OperationObserver>")
            .finish()
    }
}

impl BotConfig {
    /// Create a new builder for `BotConfig`.
    pub fn builder() -> BotConfigBuilder {
        BotConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BotConfig`].
#[derive(Debug)]
pub struct BotConfigBuilder {
    config: BotConfig,
}

impl BotConfigBuilder {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    pub fn session_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.session_sweep_interval = interval;
        self
    }

    pub fn artifact_retention(mut self, retention: Duration) -> Self {
        self.config.artifact_retention = retention;
        self
    }

    pub fn artifact_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.artifact_sweep_interval = interval;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = observer;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BotConfig, BotError> {
        let c = &self.config;
        for (name, value) in [
            ("session idle timeout", c.session_idle_timeout),
            ("session sweep interval", c.session_sweep_interval),
            ("artifact retention", c.artifact_retention),
            ("artifact sweep interval", c.artifact_sweep_interval),
        ] {
            if value.is_zero() {
                return Err(BotError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if c.max_upload_bytes == 0 {
            return Err(BotError::InvalidConfig(
                "Max upload size must be ≥ 1 byte".into(),
            ));
        }
        if c.session_sweep_interval > c.session_idle_timeout {
            return Err(BotError::InvalidConfig(format!(
                "Session sweep interval ({}s) must not exceed the idle timeout ({}s)",
                c.session_sweep_interval.as_secs(),
                c.session_idle_timeout.as_secs()
            )));
        }
        Ok(self.config)
    }
}
