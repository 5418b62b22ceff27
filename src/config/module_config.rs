use serde::Deserialize;
use serde_json::Value;

use crate::errors::ConfigError;

/// The option bag handed to a plugin factory.
///
/// A `ModuleConfig` is the `config` object of one `source` or `modules`
/// entry in the job document. Access is typed: `get::<T>(key)`
/// distinguishes a missing key from a type mismatch, and both are
/// configuration errors a front-end reports before the graph starts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ModuleConfig(pub serde_json::Map<String, Value>);

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from key/value pairs; convenient in tests and
    /// built-in plugin wiring.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        ModuleConfig(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Typed access to a required key.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.0.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|_| ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Typed access with a fallback for absent keys; a present key of the
    /// wrong type is still an error.
    pub fn get_or<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(|_| ConfigError::TypeMismatch {
                    key: key.to_string(),
                    expected: std::any::type_name::<T>(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_distinguishes_missing_from_mistyped() {
        let config = ModuleConfig::from_pairs([("n_events", json!(5))]);

        assert_eq!(config.get::<usize>("n_events").expect("typed"), 5);
        assert!(matches!(
            config.get::<usize>("absent").unwrap_err(),
            ConfigError::MissingKey { .. }
        ));
        assert!(matches!(
            config.get::<String>("n_events").unwrap_err(),
            ConfigError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn get_or_falls_back_only_when_absent() {
        let config = ModuleConfig::from_pairs([("chunk", json!(256))]);

        assert_eq!(config.get_or("chunk", 64usize).expect("present"), 256);
        assert_eq!(config.get_or("absent", 64usize).expect("default"), 64);
        assert!(config.get_or("chunk", "text".to_string()).is_err());
    }
}
