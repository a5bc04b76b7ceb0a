use url::Url;

use super::{Config, ConfigError};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid base URL '{}': {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Base URL '{}' must use http or https",
                self.base_url
            )));
        }

        self.platform_code()?;

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.stage_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "Stage timeout must be greater than 0 when set".to_string(),
            ));
        }

        if !self.quick_delivery && self.stages.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "At least one stage must be selected".to_string(),
            ));
        }

        Ok(())
    }
}
