//! Configuration module for environment variable parsing.
//!
//! All settings are read once at startup and passed explicitly into the
//! pipeline and web state.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::event::Environment;

/// Default window, in seconds, a signature timestamp may drift from now.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Default downstream delivery timeout in milliseconds.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 10_000;

/// Errors caused by missing or unsafe operator configuration.
///
/// These are the operator's fault, never the sender's.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no webhook secret configured for the {0} environment")]
    MissingSecret(Environment),

    #[error("no relay target configured")]
    MissingRelayTarget,

    #[error("invalid relay target url: {0}")]
    InvalidRelayUrl(String),

    #[error("relay target must use https in live mode")]
    InsecureRelayTarget,
}

/// When forwarding runs relative to the sender's acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardMode {
    /// Forward before responding to the sender
    #[default]
    Inline,
    /// Respond once recorded, forward on a spawned task
    Background,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Which credential scope is active
    pub environment: Environment,

    /// Downstream URL verified events are forwarded to
    pub forward_url: Option<String>,

    /// Signing secret for test-mode webhooks
    pub test_webhook_secret: Option<String>,

    /// Signing secret for live-mode webhooks
    pub live_webhook_secret: Option<String>,

    /// Maximum drift in seconds between the signature timestamp and now
    pub webhook_tolerance_secs: u64,

    /// Downstream delivery timeout in milliseconds
    pub forward_timeout_ms: u64,

    /// Inline or background forwarding
    pub forward_mode: ForwardMode,

    /// Ledger database location
    pub database_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            environment: parse_environment("RELAY_ENVIRONMENT"),

            forward_url: parse_optional("RELAY_FORWARD_URL"),

            test_webhook_secret: parse_optional("TEST_WEBHOOK_SECRET"),

            live_webhook_secret: parse_optional("LIVE_WEBHOOK_SECRET"),

            webhook_tolerance_secs: env::var("WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TOLERANCE_SECS),

            forward_timeout_ms: env::var("FORWARD_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS),

            forward_mode: parse_forward_mode("FORWARD_MODE"),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://payrelay.db?mode=rwc".to_string()),
        }
    }

    /// Secret for the active environment. The other environment's secret is
    /// never consulted.
    pub fn webhook_secret(&self) -> Option<&str> {
        let secret = match self.environment {
            Environment::Test => self.test_webhook_secret.as_deref(),
            Environment::Live => self.live_webhook_secret.as_deref(),
        };
        secret.filter(|s| !s.trim().is_empty())
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.webhook_tolerance_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

/// Parse an optional variable, treating blank values as unset.
fn parse_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_environment(name: &str) -> Environment {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return Environment::default(),
    };

    raw.parse().unwrap_or_else(|_| {
        warn!(env_var = name, value = %raw, "Invalid environment, using test");
        Environment::default()
    })
}

fn parse_forward_mode(name: &str) -> ForwardMode {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return ForwardMode::default(),
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "inline" => ForwardMode::Inline,
        "background" => ForwardMode::Background,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid forward mode, using inline");
            ForwardMode::default()
        }
    }
}
