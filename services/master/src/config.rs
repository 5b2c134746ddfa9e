use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use treadmill_store::PgConfig;

/// Which coordination store to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Postgres,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => bail!("unknown backend '{other}', expected 'memory' or 'postgres'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub backend: BackendKind,
    pub database: PgConfig,
    pub bootstrap_file: Option<PathBuf>,
    pub master: MasterConfig,
    pub quotas: QuotaLimits,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level =
            std::env::var("TREADMILL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let backend = std::env::var("TREADMILL_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;

        let database = PgConfig::from_env();

        let bootstrap_file = std::env::var("TREADMILL_BOOTSTRAP_FILE")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_level,
            backend,
            database,
            bootstrap_file,
            master: MasterConfig::from_env()?,
            quotas: QuotaLimits::from_env()?,
        })
    }
}

/// Master loop timing.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Cell name; prefixes the lock identity and is the trace source.
    pub cell: String,
    pub scheduler_interval: Duration,
    pub state_report_interval: Duration,
    pub integrity_check_interval: Duration,
    /// How long a placed app may go without starting before its server is
    /// frozen.
    pub app_start_interval: Duration,
    pub reboot_tick_interval: Duration,
    pub reboot_check_interval: Duration,
    /// Idle sleep when no events were queued.
    pub check_event_interval: Duration,
    /// Events handled per loop iteration.
    pub event_batch_size: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            cell: "local".to_string(),
            scheduler_interval: Duration::from_secs(2),
            state_report_interval: Duration::from_secs(60),
            integrity_check_interval: Duration::from_secs(30),
            app_start_interval: Duration::from_secs(300),
            reboot_tick_interval: Duration::from_secs(300),
            reboot_check_interval: Duration::from_secs(3600),
            check_event_interval: Duration::from_millis(500),
            event_batch_size: 20,
        }
    }
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            cell: std::env::var("TREADMILL_CELL").unwrap_or(defaults.cell),
            scheduler_interval: env_secs(
                "TREADMILL_SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval,
            )?,
            state_report_interval: env_secs(
                "TREADMILL_STATE_REPORT_INTERVAL_SECS",
                defaults.state_report_interval,
            )?,
            integrity_check_interval: env_secs(
                "TREADMILL_INTEGRITY_CHECK_INTERVAL_SECS",
                defaults.integrity_check_interval,
            )?,
            app_start_interval: env_secs(
                "TREADMILL_APP_START_INTERVAL_SECS",
                defaults.app_start_interval,
            )?,
            reboot_tick_interval: env_secs(
                "TREADMILL_REBOOT_TICK_INTERVAL_SECS",
                defaults.reboot_tick_interval,
            )?,
            reboot_check_interval: env_secs(
                "TREADMILL_REBOOT_CHECK_INTERVAL_SECS",
                defaults.reboot_check_interval,
            )?,
            ..defaults
        })
    }

    /// Identity the leader lock is taken with.
    pub fn lock_identity(&self) -> String {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{}:{}:{}", self.cell, host, std::process::id())
    }
}

/// Instance creation quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub total: u64,
    pub per_proid: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            total: 50_000,
            per_proid: 10_000,
        }
    }
}

impl QuotaLimits {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            total: env_u64("TREADMILL_TOTAL_QUOTA", defaults.total)?,
            per_proid: env_u64("TREADMILL_PROID_QUOTA", defaults.per_proid)?,
        })
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer, got '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    env_u64(name, default.as_secs()).map(Duration::from_secs)
}
