//! Provider configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::metal::executor::{BatchPolling, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::schema::{Attribute, Diagnostic, Schema};

/// Settings shared by every port the provider manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Seconds between two polls of a VLAN assignment batch.
    pub batch_poll_interval_seconds: u64,
    /// Polls before a VLAN assignment batch times out.
    pub batch_poll_attempts: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            batch_poll_interval_seconds: DEFAULT_POLL_INTERVAL.as_secs(),
            batch_poll_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

impl ProviderConfig {
    /// Read the configuration. Null, or null attributes, mean defaults.
    pub fn from_value(config: &Value) -> Result<Self, ProviderError> {
        let mut config = config.clone();
        match &mut config {
            Value::Null => return Ok(Self::default()),
            Value::Object(attributes) => attributes.retain(|_, v| !v.is_null()),
            _ => {},
        }
        Ok(serde_json::from_value(config)?)
    }

    /// Batch polling derived from this configuration.
    pub fn polling(&self) -> BatchPolling {
        BatchPolling {
            interval: Duration::from_secs(self.batch_poll_interval_seconds),
            max_attempts: self.batch_poll_attempts,
        }
    }

    /// Report values that cannot be used.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if self.batch_poll_interval_seconds == 0 {
            diagnostics.push(
                Diagnostic::error("Invalid batch poll interval")
                    .with_detail("batch_poll_interval_seconds must be at least 1")
                    .with_attribute("batch_poll_interval_seconds"),
            );
        }
        if self.batch_poll_attempts == 0 {
            diagnostics.push(
                Diagnostic::error("Invalid batch poll attempts")
                    .with_detail("batch_poll_attempts must be at least 1")
                    .with_attribute("batch_poll_attempts"),
            );
        }
        diagnostics
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "batch_poll_interval_seconds",
                Attribute::optional_int64().with_description(format!(
                    "Seconds between polls of a VLAN assignment batch. Defaults to {}.",
                    DEFAULT_POLL_INTERVAL.as_secs()
                )),
            )
            .with_attribute(
                "batch_poll_attempts",
                Attribute::optional_int64().with_description(format!(
                    "Polls before a VLAN assignment batch times out. Defaults to {}.",
                    DEFAULT_POLL_ATTEMPTS
                )),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_value(&Value::Null).unwrap();
        assert_eq!(config, ProviderConfig::default());
        assert_eq!(config.polling(), BatchPolling::default());

        let config = ProviderConfig::from_value(&json!({"batch_poll_attempts": null})).unwrap();
        assert_eq!(config.batch_poll_attempts, 180);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = ProviderConfig::from_value(&json!({
            "batch_poll_interval_seconds": 2,
            "batch_poll_attempts": 10
        }))
        .unwrap();
        assert_eq!(config.polling().budget(), Duration::from_secs(20));
    }

    #[test]
    fn test_invalid_values() {
        let err = ProviderConfig::from_value(&json!({"batch_poll_attempts": "many"})).unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));

        let config = ProviderConfig::from_value(&json!({
            "batch_poll_interval_seconds": 0,
            "batch_poll_attempts": 0
        }))
        .unwrap();
        let diagnostics = config.validate();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(Diagnostic::is_error));
    }
}
