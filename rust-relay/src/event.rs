//! Core types shared by the verifier, the ledger and the forwarder.
//!
//! The raw payload is carried as `Bytes` end to end. It is the exact body the
//! provider signed and the exact body the downstream consumer receives.

use std::fmt;
use std::str::FromStr;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigurationError;

// =============================================================================
// Environment
// =============================================================================

/// Credential and data scope the relay is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Live => "live",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "live" => Ok(Environment::Live),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

// =============================================================================
// Webhook Event
// =============================================================================

/// A verified inbound notification from the payment provider.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Provider-assigned identifier, used as the idempotency key
    pub id: String,
    /// Event category, e.g. `payment_intent.succeeded`
    pub event_type: String,
    /// Whether the provider emitted this from its live environment
    pub livemode: bool,
    /// Body exactly as received
    pub raw_payload: Bytes,
    /// Signature header exactly as received
    pub signature_header: String,
}

/// Ledger entry written once per distinct event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub provider_id: String,
    pub event_type: String,
    pub livemode: bool,
    pub recorded_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn from_event(event: &WebhookEvent, recorded_at: DateTime<Utc>) -> Self {
        Self {
            provider_id: event.id.clone(),
            event_type: event.event_type.clone(),
            livemode: event.livemode,
            recorded_at,
        }
    }
}

// =============================================================================
// Relay Target
// =============================================================================

/// Downstream consumer that verified events are relayed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub url: String,
    pub environment: Environment,
}

impl RelayTarget {
    pub fn new(url: impl Into<String>, environment: Environment) -> Self {
        Self {
            url: url.into(),
            environment,
        }
    }

    /// Check the transport policy for this target.
    ///
    /// Live targets must use `https`. Test targets may use plain `http`.
    pub fn validate(&self) -> Result<Url, ConfigurationError> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| ConfigurationError::InvalidRelayUrl(e.to_string()))?;

        match (parsed.scheme(), self.environment) {
            ("https", _) => Ok(parsed),
            ("http", Environment::Test) => Ok(parsed),
            ("http", Environment::Live) => Err(ConfigurationError::InsecureRelayTarget),
            (scheme, _) => Err(ConfigurationError::InvalidRelayUrl(format!(
                "unsupported scheme '{}'",
                scheme
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("live".parse::<Environment>(), Ok(Environment::Live));
        assert_eq!(" TEST ".parse::<Environment>(), Ok(Environment::Test));
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::default(), Environment::Test);
    }

    #[test]
    fn test_live_target_requires_https() {
        let target = RelayTarget::new("http://consumer.example/hook", Environment::Live);
        assert!(matches!(
            target.validate(),
            Err(ConfigurationError::InsecureRelayTarget)
        ));

        let target = RelayTarget::new("https://consumer.example/hook", Environment::Live);
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_test_target_allows_http() {
        let target = RelayTarget::new("http://localhost:3000/hook", Environment::Test);
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_target_rejects_bad_urls() {
        let target = RelayTarget::new("not a url", Environment::Test);
        assert!(matches!(
            target.validate(),
            Err(ConfigurationError::InvalidRelayUrl(_))
        ));

        let target = RelayTarget::new("ftp://consumer.example/hook", Environment::Test);
        assert!(matches!(
            target.validate(),
            Err(ConfigurationError::InvalidRelayUrl(_))
        ));
    }
}
