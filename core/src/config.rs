/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3811;
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Log filter used when neither `--log`, `PARLEY_LOG` nor `RUST_LOG` is set.
/// Covers the binary's own target as well as the library's.
pub const DEFAULT_LOG_FILTER: &str = "parley=info,parley_core=info,warn";

/// Server address persisted next to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    pub host: String,
    pub port: u16,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl HostSettings {
    /// Read the settings file. Any failure falls back to the defaults, which are
    /// written back so the next load finds a valid file.
    pub fn load_or_init(path: &Path) -> Self {
        match Self::read(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Using default host settings ({})", e);
                let defaults = Self::default();
                if let Err(e) = defaults.save(path) {
                    warn!("Could not write default settings to {}: {}", path.display(), e);
                }
                defaults
            }
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        debug!("Wrote host settings to {}", path.display());
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reconnection timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first retry
    pub initial_delay: Duration,
    /// Extra wait added per attempt: attempt k waits (k - 1) * step
    pub step: Duration,
    pub max_attempts: u32,
    /// Pause before every dial, initial or retry
    pub settle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            step: Duration::from_secs(60),
            max_attempts: 10,
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait that precedes retry `attempt` (1-indexed), measured from the previous attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let extra = self.step * attempt.saturating_sub(1);
        if attempt <= 1 {
            self.initial_delay + extra
        } else {
            extra
        }
    }

    /// Earliest time retry `attempt` can fire, measured from the initial failure
    pub fn earliest_start(&self, attempt: u32) -> Duration {
        (1..=attempt).map(|k| self.delay_before(k)).sum()
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host settings file, re-read before every reconnect attempt
    pub settings_path: PathBuf,

    /// Log filter, `tracing_subscriber::EnvFilter` syntax
    pub log_filter: Option<String>,

    /// Upper bound on a single dial
    pub connect_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from(DEFAULT_SETTINGS_FILE),
            log_filter: None,
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--settings" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--settings requires a path argument".to_string())
                    })?;
                    config.settings_path = PathBuf::from(path);
                    i += 2;
                }
                "--log" => {
                    let filter = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--log requires a filter argument".to_string())
                    })?;
                    config.log_filter = Some(filter.clone());
                    i += 2;
                }
                "--connect-timeout" => {
                    let secs = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--connect-timeout requires a number of seconds".to_string())
                    })?;
                    let secs = secs.parse::<u64>().map_err(|_| {
                        ChatError::Config("--connect-timeout must be a whole number of seconds".to_string())
                    })?;
                    config.connect_timeout = Duration::from_secs(secs);
                    i += 2;
                }
                other => {
                    return Err(ChatError::Config(format!(
                        "Unknown argument: {}\nUsage: {} [--settings <path>] [--log <filter>] [--connect-timeout <secs>]",
                        other,
                        args.first().map(String::as_str).unwrap_or("parley")
                    )));
                }
            }
        }

        // Env overrides (flags win)
        if !args.iter().any(|a| a == "--settings") {
            if let Ok(path) = std::env::var("PARLEY_SETTINGS") {
                config.settings_path = PathBuf::from(path);
            }
        }
        if config.log_filter.is_none() {
            config.log_filter = std::env::var("PARLEY_LOG").ok();
        }

        Ok(config)
    }
}
