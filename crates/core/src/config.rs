// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler configuration.
//!
//! Deploy and repair settings are each either an integer number of seconds
//! (a per-resource interval, `0` disables) or a cron expression (a global,
//! environment-wide schedule).

use crate::cron::{CronError, CronSchedule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default per-resource deploy interval
pub const DEFAULT_DEPLOY_INTERVAL_SECS: u64 = 600;
/// Default per-resource repair interval
pub const DEFAULT_REPAIR_INTERVAL_SECS: u64 = 86_400;

pub const ENV_DEPLOY_INTERVAL: &str = "CV_DEPLOY_INTERVAL";
pub const ENV_REPAIR_INTERVAL: &str = "CV_REPAIR_INTERVAL";
pub const ENV_SHUTDOWN_GRACE_MS: &str = "CV_SHUTDOWN_GRACE_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid timer setting: {0}")]
    Cron(#[from] CronError),
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// How one of the two periodic triggers is configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimerSetting", into = "RawTimerSetting")]
pub enum TimerSetting {
    Disabled,
    /// Per-resource: fire this long after the resource's last deploy
    Interval(Duration),
    /// Global: fire for all resources on this schedule
    Cron(CronSchedule),
}

impl TimerSetting {
    /// Parse a textual setting. All-digit strings (optionally signed) are
    /// intervals in seconds, anything else must be a cron expression.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if let Ok(secs) = trimmed.parse::<i64>() {
            return Ok(Self::from_seconds(secs));
        }
        Ok(TimerSetting::Cron(CronSchedule::parse(trimmed)?))
    }

    pub fn from_seconds(secs: i64) -> Self {
        if secs > 0 {
            TimerSetting::Interval(Duration::from_secs(secs as u64))
        } else {
            TimerSetting::Disabled
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            TimerSetting::Interval(d) => Some(*d),
            _ => None,
        }
    }

    pub fn cron(&self) -> Option<&CronSchedule> {
        match self {
            TimerSetting::Cron(c) => Some(c),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimerSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerSetting::Disabled => f.write_str("disabled"),
            TimerSetting::Interval(d) => write!(f, "{}s", d.as_secs()),
            TimerSetting::Cron(c) => write!(f, "cron '{c}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawTimerSetting {
    Seconds(i64),
    Text(String),
}

impl TryFrom<RawTimerSetting> for TimerSetting {
    type Error = ConfigError;

    fn try_from(raw: RawTimerSetting) -> Result<Self, Self::Error> {
        match raw {
            RawTimerSetting::Seconds(secs) => Ok(TimerSetting::from_seconds(secs)),
            RawTimerSetting::Text(text) => TimerSetting::parse(&text),
        }
    }
}

impl From<TimerSetting> for RawTimerSetting {
    fn from(setting: TimerSetting) -> Self {
        match setting {
            TimerSetting::Disabled => RawTimerSetting::Seconds(0),
            TimerSetting::Interval(d) => RawTimerSetting::Seconds(d.as_secs() as i64),
            TimerSetting::Cron(c) => RawTimerSetting::Text(c.expression().to_string()),
        }
    }
}

/// Per-agent overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub deploy_interval: TimerSetting,
    pub repair_interval: TimerSetting,
    /// Concurrent tasks per agent unless overridden in `agents`
    pub default_agent_concurrency: usize,
    /// Cap on concurrent tasks across all agents
    pub max_concurrency: Option<usize>,
    /// How long in-flight tasks may run on after shutdown is requested
    pub shutdown_grace_ms: u64,
    pub agents: HashMap<String, AgentConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deploy_interval: TimerSetting::Interval(Duration::from_secs(
                DEFAULT_DEPLOY_INTERVAL_SECS,
            )),
            repair_interval: TimerSetting::Interval(Duration::from_secs(
                DEFAULT_REPAIR_INTERVAL_SECS,
            )),
            default_agent_concurrency: 1,
            max_concurrency: None,
            shutdown_grace_ms: 5_000,
            agents: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    crate::setters! {
        set {
            deploy_interval: TimerSetting,
            repair_interval: TimerSetting,
            default_agent_concurrency: usize,
            shutdown_grace_ms: u64,
        }
        option {
            max_concurrency: usize,
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&text)
    }

    /// Apply `CV_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(ENV_DEPLOY_INTERVAL) {
            self.deploy_interval = TimerSetting::parse(&raw)?;
        }
        if let Some(raw) = lookup(ENV_REPAIR_INTERVAL) {
            self.repair_interval = TimerSetting::parse(&raw)?;
        }
        if let Some(raw) = lookup(ENV_SHUTDOWN_GRACE_MS) {
            self.shutdown_grace_ms = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: ENV_SHUTDOWN_GRACE_MS, value: raw })?;
        }
        Ok(self)
    }

    pub fn agent_concurrency(&self, agent: &str) -> usize {
        self.agents.get(agent).map(|a| a.concurrency).unwrap_or(self.default_agent_concurrency)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Whether the two configs schedule timers identically
    pub fn same_timers(&self, other: &SchedulerConfig) -> bool {
        self.deploy_interval == other.deploy_interval
            && self.repair_interval == other.repair_interval
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
