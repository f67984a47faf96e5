use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::backoff::BackoffConfig;
use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 11211;
pub const DEFAULT_REFRESH_MS: u64 = 500;
pub const DEFAULT_WORKERS: usize = 3;

/// How the periodic key snapshot is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportKind {
    Csv,
    #[default]
    Curses,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::Csv => f.write_str("csv"),
            ReportKind::Curses => f.write_str("curses"),
        }
    }
}

/// Runtime configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub interface: String,
    pub port: u16,
    /// Keys whose req/s rate falls below this are discarded. 0 keeps everything.
    pub discard_threshold: f64,
    pub refresh_interval: Duration,
    pub report: ReportKind,
    pub logfile: Option<PathBuf>,
    pub verbosity: u8,

    /// Number of shard workers.
    pub workers: usize,
    /// Length of the per-key rate measurement window.
    pub stats_window: Duration,
    /// How often the stats table is swept for cold keys.
    pub sweep_interval: Duration,
    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: String::new(),
            port: DEFAULT_PORT,
            discard_threshold: 0.0,
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_MS),
            report: ReportKind::default(),
            logfile: None,
            verbosity: 0,
            workers: DEFAULT_WORKERS,
            stats_window: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(1),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(Error::InvalidConfig("interface is required".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must be non-zero".into()));
        }
        if self.discard_threshold.is_nan() || self.discard_threshold < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "discard threshold must be a non-negative number, got {}",
                self.discard_threshold
            )));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::InvalidConfig("refresh interval must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("at least one worker is required".into()));
        }
        if self.stats_window.is_zero() || self.sweep_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "stats window and sweep interval must be positive".into(),
            ));
        }
        self.backoff.validate()
    }

    /// Log filter directive implied by the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            interface: "eth0".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 11211);
        assert_eq!(cfg.refresh_interval, Duration::from_millis(500));
        assert_eq!(cfg.report, ReportKind::Curses);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.discard_threshold, 0.0);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());

        let cfg = Config {
            discard_threshold: -1.0,
            ..valid()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            discard_threshold: f64::NAN,
            ..valid()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            workers: 0,
            ..valid()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            refresh_interval: Duration::ZERO,
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut cfg = valid();
        assert_eq!(cfg.log_level(), "warn");
        cfg.verbosity = 2;
        assert_eq!(cfg.log_level(), "debug");
        cfg.verbosity = 9;
        assert_eq!(cfg.log_level(), "trace");
    }
}
