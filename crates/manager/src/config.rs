//! Daemon settings

use anyhow::{Context, Result};
use manager_lib::engine::EngineTimeouts;
use manager_lib::FailurePolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon settings, read from `MANAGER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Address the HTTP surface binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Desired configuration document (YAML)
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Deadline for every engine call except pulls
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,

    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    /// Upper bound on concurrent stats queries
    #[serde(default = "default_stats_concurrency")]
    pub stats_concurrency: usize,

    /// `best_effort` or `fail_fast`
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,

    /// Answer `/metrics` with 200 even when some stats queries failed
    #[serde(default)]
    pub serve_partial_metrics: bool,

    /// Host name attached to lifecycle log events
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config.yaml")
}

fn default_engine_timeout() -> u64 {
    30
}

fn default_pull_timeout() -> u64 {
    300
}

fn default_stats_concurrency() -> usize {
    manager_lib::stats::DEFAULT_CONCURRENCY
}

fn default_failure_policy() -> String {
    FailurePolicy::default().to_string()
}

fn default_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl AgentConfig {
    /// Load settings from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MANAGER").try_parsing(true))
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        let settings: Self = config
            .try_deserialize()
            .context("invalid MANAGER_* settings")?;
        // Reject an unknown policy at startup rather than on the first pass
        settings.policy()?;
        Ok(settings)
    }

    pub fn policy(&self) -> Result<FailurePolicy> {
        self.failure_policy
            .parse()
            .map_err(anyhow::Error::msg)
    }

    pub fn timeouts(&self) -> EngineTimeouts {
        EngineTimeouts {
            default: Duration::from_secs(self.engine_timeout_secs),
            pull: Duration::from_secs(self.pull_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(overrides: &[(&str, &str)]) -> Result<AgentConfig> {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        AgentConfig::from_config(builder.build()?)
    }

    #[test]
    fn test_defaults() {
        let settings = build(&[]).unwrap();

        assert_eq!(settings.listen_addr, "0.0.0.0:8082");
        assert_eq!(settings.config_path, PathBuf::from("config.yaml"));
        assert_eq!(settings.stats_concurrency, 8);
        assert!(!settings.serve_partial_metrics);
        assert_eq!(settings.policy().unwrap(), FailurePolicy::BestEffort);
        assert_eq!(settings.timeouts().pull, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let settings = build(&[
            ("failure_policy", "fail_fast"),
            ("engine_timeout_secs", "5"),
            ("serve_partial_metrics", "true"),
        ])
        .unwrap();

        assert_eq!(settings.policy().unwrap(), FailurePolicy::FailFast);
        assert_eq!(settings.timeouts().default, Duration::from_secs(5));
        assert!(settings.serve_partial_metrics);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(build(&[("failure_policy", "retry_forever")]).is_err());
    }
}
