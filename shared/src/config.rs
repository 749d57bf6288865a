use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::MediaReference;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("{field} must be between 1 and {max} ms, got {value}")]
    InvalidTimeout {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("max_upload_bytes must be > 0")]
    InvalidUploadLimit,
}

/// Where the trip service lives and how long calls may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base()?;
        check_timeout("request_timeout_ms", self.request_timeout_ms)?;
        check_timeout("upload_timeout_ms", self.upload_timeout_ms)?;
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidUploadLimit);
        }
        Ok(())
    }

    /// Parsed base URL; must be http(s) with a host.
    pub fn base(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };
        let url = Url::parse(self.base_url.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".into()));
        }
        Ok(url)
    }

    /// Absolute URL for displaying an attached item. The service returns
    /// paths like `/uploads/beach.jpg`, which live on the API's origin.
    pub fn media_url(&self, media: &MediaReference) -> Result<String, ConfigError> {
        if let Ok(absolute) = Url::parse(&media.url) {
            return Ok(absolute.to_string());
        }
        let base = self.base()?;
        base.join(&media.url)
            .map(String::from)
            .map_err(|e| ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("cannot resolve '{}': {e}", media.url),
            })
    }
}

fn check_timeout(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_TIMEOUT_MS {
        return Err(ConfigError::InvalidTimeout {
            field,
            value,
            max: MAX_TIMEOUT_MS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;

    fn media(url: &str) -> MediaReference {
        MediaReference {
            url: url.into(),
            media_type: MediaType::Image,
            filename: "x.jpg".into(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = GatewayConfig::new("ftp://files.example.com");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBaseUrl { .. })));

        let config = GatewayConfig {
            request_timeout_ms: 0,
            ..GatewayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { field: "request_timeout_ms", .. })
        ));

        let config = GatewayConfig {
            upload_timeout_ms: MAX_TIMEOUT_MS + 1,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            max_upload_bytes: 0,
            ..GatewayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidUploadLimit));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"base_url": "https://trips.example.com/api"}"#).unwrap();
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn test_media_url_resolution() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.media_url(&media("/uploads/beach.jpg")).unwrap(),
            "http://localhost:5000/uploads/beach.jpg"
        );
        assert_eq!(
            config.media_url(&media("https://cdn.example.com/a.jpg")).unwrap(),
            "https://cdn.example.com/a.jpg"
        );
    }
}
