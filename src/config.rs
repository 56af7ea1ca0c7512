//! Configuration loading from TOML.
//!
//! Reads `config.toml` (or the path in `POOLSCAN_CONFIG`) and
//! deserializes into strongly-typed structs. Every key except the
//! source list has a default, so a minimal file only lists sources.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Capacity of the channel shared by all sources.
    pub event_buffer: usize,
    /// Per-subscriber live buffer.
    pub subscriber_buffer: usize,
    /// How long a stopping run waits for sources before aborting them.
    pub shutdown_grace_ms: u64,
    /// Emit one log line per newly discovered pool.
    pub log_discoveries: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            event_buffer: 128,
            subscriber_buffer: 32,
            shutdown_grace_ms: 5_000,
            log_discoveries: true,
        }
    }
}

impl ScannerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

/// One configured feed, tagged by `kind`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    #[serde(alias = "mock")]
    Synthetic(SyntheticConfig),
    MeteoraDlmm(MeteoraConfig),
}

impl SourceConfig {
    pub fn enabled(&self) -> bool {
        match self {
            SourceConfig::Synthetic(c) => c.enabled,
            SourceConfig::MeteoraDlmm(c) => c.enabled,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyntheticConfig {
    pub enabled: bool,
    pub chain: String,
    pub dex: String,
    pub interval_ms: u64,
    /// Re-emit the previous pool every N ticks (0 disables).
    pub repeat_every: u64,
    /// Stop after this many emissions.
    pub limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chain: "solana".into(),
            dex: "raydium".into(),
            interval_ms: 1_500,
            repeat_every: 5,
            limit: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MeteoraConfig {
    pub enabled: bool,
    pub base_url: String,
    pub poll_interval_secs: u64,
    pub max_consecutive_failures: u32,
}

impl Default for MeteoraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: crate::sources::meteora::DEFAULT_BASE_URL.into(),
            poll_interval_secs: 30,
            max_consecutive_failures: 5,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.event_buffer == 0 {
            anyhow::bail!("scanner.event_buffer must be at least 1");
        }
        if self.scanner.subscriber_buffer == 0 {
            anyhow::bail!("scanner.subscriber_buffer must be at least 1");
        }
        if !self.sources.iter().any(SourceConfig::enabled) {
            anyhow::bail!("No enabled source configured");
        }
        for source in &self.sources {
            match source {
                SourceConfig::Synthetic(c) if c.interval_ms == 0 => {
                    anyhow::bail!("synthetic source interval_ms must be positive");
                }
                SourceConfig::MeteoraDlmm(c) if c.poll_interval_secs == 0 => {
                    anyhow::bail!("meteora_dlmm source poll_interval_secs must be positive");
                }
                _ => {}
            }
        }
        Ok(())
    }
}
