//! Configuration management for Turnstile.
//!
//! Every setting has a built-in default; a YAML file and `TURNSTILE__`
//! environment variables may override them at startup. Nothing is reloaded
//! while running.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::ratelimit::SlowDownPolicy;

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-route-family policies
    #[serde(default)]
    pub policies: PoliciesConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Limits for one named policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Requests admitted per window
    pub max: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Message returned to rejected callers
    pub message: String,
    /// Optional progressive slow-down, counted over the same window length
    #[serde(default)]
    pub slow_down: Option<SlowDownSpec>,
}

impl PolicySpec {
    /// Get the window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Slow-down settings for a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowDownSpec {
    /// Requests per window served without delay
    pub delay_after: u64,
    /// Delay added per request past `delay_after`, in milliseconds
    pub delay_ms: u64,
    /// Cap on any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl SlowDownSpec {
    /// Validate and convert into a runtime policy.
    pub fn to_policy(&self) -> Result<SlowDownPolicy> {
        SlowDownPolicy::new(
            self.delay_after,
            Duration::from_millis(self.delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// The fixed set of route-family policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// Every public API route
    #[serde(default = "default_general_api")]
    pub general_api: PolicySpec,

    /// Audit job submission
    #[serde(default = "default_audit_submission")]
    pub audit_submission: PolicySpec,

    /// Credit purchase and deduction
    #[serde(default = "default_credit_operations")]
    pub credit_operations: PolicySpec,

    /// AI-assisted analysis
    #[serde(default = "default_ai_analysis")]
    pub ai_analysis: PolicySpec,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            general_api: default_general_api(),
            audit_submission: default_audit_submission(),
            credit_operations: default_credit_operations(),
            ai_analysis: default_ai_analysis(),
        }
    }
}

fn default_general_api() -> PolicySpec {
    PolicySpec {
        max: 100,
        window_ms: HOUR_MS,
        message: "Too many requests from this client, please try again later.".to_string(),
        slow_down: None,
    }
}

fn default_audit_submission() -> PolicySpec {
    PolicySpec {
        max: 10,
        window_ms: HOUR_MS,
        message: "Too many audit submissions, please try again later.".to_string(),
        slow_down: Some(SlowDownSpec {
            delay_after: 5,
            delay_ms: 1_000,
            max_delay_ms: 10_000,
        }),
    }
}

fn default_credit_operations() -> PolicySpec {
    PolicySpec {
        max: 50,
        window_ms: HOUR_MS,
        message: "Too many credit operations, please try again later.".to_string(),
        slow_down: None,
    }
}

fn default_ai_analysis() -> PolicySpec {
    PolicySpec {
        max: 25,
        window_ms: HOUR_MS,
        message: "Too many AI analysis requests, please try again later.".to_string(),
        slow_down: None,
    }
}

impl TurnstileConfig {
    /// Load configuration: built-in defaults, then the optional YAML file at
    /// `path`, then `TURNSTILE__SECTION__KEY` environment variables.
    ///
    /// Overrides apply field by field, so `TURNSTILE__POLICIES__AI_ANALYSIS__MAX=5`
    /// keeps the rest of that policy at its defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::defaults_builder()?;
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(config::Environment::with_prefix("TURNSTILE").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string layered over the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::defaults_builder()?
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    fn defaults_builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = config::Config::try_from(&Self::default())?;
        Ok(config::Config::builder().add_source(defaults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();

        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.policies.general_api.max, 100);
        assert_eq!(config.policies.audit_submission.max, 10);
        assert_eq!(config.policies.credit_operations.max, 50);
        assert_eq!(config.policies.ai_analysis.max, 25);
        assert_eq!(config.policies.general_api.window(), Duration::from_secs(3600));

        let slow_down = config.policies.audit_submission.slow_down.unwrap();
        assert_eq!(slow_down.delay_after, 5);
        assert_eq!(slow_down.delay_ms, 1_000);
        assert_eq!(slow_down.max_delay_ms, 10_000);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
policies:
  ai_analysis:
    max: 5
    window_ms: 60000
    message: "AI quota used up"
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.policies.ai_analysis.max, 5);
        assert_eq!(config.policies.ai_analysis.window(), Duration::from_secs(60));
        assert_eq!(config.policies.ai_analysis.slow_down, None);
        assert_eq!(config.policies.general_api, default_general_api());
    }

    #[test]
    fn test_yaml_overrides_single_field() {
        let yaml = r#"
policies:
  ai_analysis:
    max: 5
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.policies.ai_analysis.max, 5);
        assert_eq!(config.policies.ai_analysis.window_ms, HOUR_MS);
        assert_eq!(
            config.policies.ai_analysis.message,
            default_ai_analysis().message
        );
        assert_eq!(config.policies.audit_submission, default_audit_submission());
    }

    #[test]
    fn test_env_overrides_single_field() {
        std::env::set_var("TURNSTILE__POLICIES__CREDIT_OPERATIONS__MAX", "7");
        let loaded = TurnstileConfig::load(None);
        std::env::remove_var("TURNSTILE__POLICIES__CREDIT_OPERATIONS__MAX");

        let config = loaded.unwrap();
        assert_eq!(config.policies.credit_operations.max, 7);
        assert_eq!(config.policies.credit_operations.window_ms, HOUR_MS);
        assert_eq!(config.policies.credit_operations.slow_down, None);
        assert_eq!(config.policies.general_api, default_general_api());
        assert_eq!(config.server.http_addr, default_http_addr());
    }

    #[test]
    fn test_yaml_slow_down() {
        let yaml = r#"
policies:
  credit_operations:
    max: 20
    window_ms: 600000
    message: "Easy on the credits"
    slow_down:
      delay_after: 10
      delay_ms: 250
      max_delay_ms: 2000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let policy = config
            .policies
            .credit_operations
            .slow_down
            .unwrap()
            .to_policy()
            .unwrap();

        assert_eq!(policy.delay_after, 10);
        assert_eq!(policy.delay_step, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = TurnstileConfig::from_yaml("policies: [1, 2").unwrap_err();
        assert!(matches!(err, crate::error::TurnstileError::Config(_)));
    }
}
