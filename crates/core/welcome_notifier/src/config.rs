use crate::message::MessageTemplate;
use coalescer::CoalescerConfig;
use coalescer::ConfigError;
use coalescer::MaxWaitAnchor;
use serde::Deserialize;
use serde::Deserializer;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of the welcome notifier
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NotifierConfig {
    pub batching: CoalescerConfig,
    pub template: MessageTemplate,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigFileError {
    #[error("Failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid batching configuration in {path:?}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// Configuration as parsed from the TOML file
#[derive(Clone, Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    #[serde(default)]
    batching: TomlBatching,
    #[serde(default)]
    message: TomlMessage,
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct TomlBatching {
    #[serde(default, deserialize_with = "deserialize_duration")]
    base_delay: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    min_delay: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    max_wait: Option<Duration>,
    #[serde(default)]
    max_users: Option<usize>,
    #[serde(default)]
    max_wait_anchor: Option<MaxWaitAnchor>,
    #[serde(default)]
    notified_capacity: Option<usize>,
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct TomlMessage {
    #[serde(default)]
    template: Option<String>,
}

/// Parse durations such as "8s" or "1m 30s"
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = String::deserialize(deserializer)?;
    humantime::parse_duration(&duration)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

impl NotifierConfig {
    /// Read the configuration file, if any. Without file, the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        let Some(path) = path else {
            return Ok(NotifierConfig::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(path, &content)
    }

    fn from_toml(path: &Path, content: &str) -> Result<Self, ConfigFileError> {
        let toml: TomlConfig = toml::from_str(content).map_err(|source| ConfigFileError::Parse {
            path: path.to_owned(),
            source,
        })?;

        let defaults = CoalescerConfig::default();
        let batching = toml.batching;
        let batching = CoalescerConfig::builder()
            .base_delay(batching.base_delay.unwrap_or(defaults.base_delay()))
            .min_delay(batching.min_delay.unwrap_or(defaults.min_delay()))
            .max_wait(batching.max_wait.unwrap_or(defaults.max_wait()))
            .max_users(batching.max_users.unwrap_or(defaults.max_users()))
            .max_wait_anchor(batching.max_wait_anchor.unwrap_or_default())
            .notified_capacity(batching.notified_capacity)
            .build()
            .map_err(|source| ConfigFileError::Invalid {
                path: path.to_owned(),
                source,
            })?;

        let template = toml
            .message
            .template
            .map(MessageTemplate::new)
            .unwrap_or_default();

        Ok(NotifierConfig { batching, template })
    }
}
