use std::error::Error;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::ai::ImageDetail;

const DEFAULT_VISION_MODEL: &str = "sign-reader-2";

/// Validated runtime configuration. Everything is optional: with no config
/// file at all the tool runs fully offline.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub remote: RemoteConfig,
    pub ai: Option<AiConfig>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteConfig {
    /// No shared directory; pushes fail and watches cannot start.
    Off,
    /// In-process directory for demos and tests.
    Memory,
    Http {
        base_url: String,
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub detail: ImageDetail,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    remote: Option<RawRemote>,
    #[serde(default)]
    ai: Option<RawAi>,
    #[serde(default)]
    identity: Option<RawIdentity>,
}

#[derive(Debug, Deserialize)]
struct RawRemote {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAi {
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    detail: Option<ImageDetail>,
}

#[derive(Debug, Deserialize)]
struct RawIdentity {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config file: {}", err),
            ConfigError::Toml(err) => write!(f, "invalid config TOML: {}", err),
            ConfigError::Invalid(message) => write!(f, "invalid config: {}", message),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Toml(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::Off,
            ai: None,
            user_id: None,
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file yields the offline defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub(crate) fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(raw)?;
        let remote = normalize_remote(raw.remote)?;
        let ai = raw.ai.map(|ai| AiConfig {
            base_url: ai.base_url.trim_end_matches('/').to_string(),
            api_key: ai.api_key,
            model: ai
                .model
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            detail: ai.detail.unwrap_or(ImageDetail::High),
        });
        let user_id = raw
            .identity
            .and_then(|identity| identity.user_id)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self {
            remote,
            ai,
            user_id,
        })
    }
}

fn normalize_remote(raw: Option<RawRemote>) -> Result<RemoteConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(RemoteConfig::Off);
    };
    match raw.mode.as_deref().unwrap_or("off") {
        "off" => Ok(RemoteConfig::Off),
        "memory" => Ok(RemoteConfig::Memory),
        "http" => {
            let base_url = raw
                .base_url
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    ConfigError::Invalid("remote.base_url is required for mode = \"http\"".to_string())
                })?;
            Ok(RemoteConfig::Http {
                base_url,
                api_key: raw.api_key,
            })
        }
        other => Err(ConfigError::Invalid(format!(
            "unknown remote.mode '{}': expected off, memory, or http",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, RemoteConfig};
    use crate::ai::ImageDetail;

    #[test]
    fn missing_sections_fall_back_to_offline_defaults() {
        let config = Config::from_toml("").expect("empty config should parse");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parses_a_full_config() {
        let config = Config::from_toml(
            r#"
[remote]
mode = "http"
base_url = "https://api.example.test/"
api_key = "k-123"

[ai]
base_url = "https://ai.example.test"
model = "sign-reader-3"
detail = "low"

[identity]
user_id = "user-42"
"#,
        )
        .expect("config should parse");

        assert_eq!(
            config.remote,
            RemoteConfig::Http {
                base_url: "https://api.example.test".to_string(),
                api_key: Some("k-123".to_string()),
            }
        );
        let ai = config.ai.expect("ai section should be present");
        assert_eq!(ai.model, "sign-reader-3");
        assert_eq!(ai.detail, ImageDetail::Low);
        assert_eq!(config.user_id.as_deref(), Some("user-42"));
    }

    #[test]
    fn http_mode_requires_a_base_url() {
        let err = Config::from_toml("[remote]\nmode = \"http\"\n")
            .expect_err("config should be rejected");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_remote_mode_is_rejected() {
        let err = Config::from_toml("[remote]\nmode = \"carrier-pigeon\"\n")
            .expect_err("config should be rejected");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn ai_model_defaults_when_omitted() {
        let config = Config::from_toml("[ai]\nbase_url = \"https://ai.example.test\"\n")
            .expect("config should parse");
        let ai = config.ai.expect("ai section should be present");
        assert_eq!(ai.model, "sign-reader-2");
        assert_eq!(ai.detail, ImageDetail::High);
    }
}
