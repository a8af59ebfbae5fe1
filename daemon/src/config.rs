//! Daemon configuration.

use altrates_engine::EngineConfig;
use altrates_feeds::FeedsConfig;

/// Main daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Rate engine settings.
    pub engine: EngineConfig,
    /// Upstream client settings.
    pub feeds: FeedsConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Stream live trades into the rate table.
    pub trade_stream: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            feeds: FeedsConfig::default(),
            log_level: "info".to_string(),
            trade_stream: true,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            engine: EngineConfig::from_env(),
            feeds: FeedsConfig::from_env(),
            ..Self::default()
        };

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(enabled) = std::env::var("RATES_TRADE_STREAM").ok().and_then(|v| parse_flag(&v)) {
            config.trade_stream = enabled;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;
        self.feeds.validate()?;

        if self.log_level.trim().is_empty() {
            return Err("Log level cannot be empty".to_string());
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> DaemonConfig {
        DaemonConfig {
            feeds: FeedsConfig {
                oxr_app_id: Some("abc123".to_string()),
                ..FeedsConfig::default()
            },
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        assert!(configured().validate().is_ok());
        assert!(DaemonConfig::default().trade_stream);
    }

    #[test]
    fn test_missing_app_id() {
        assert!(DaemonConfig::default().validate().is_err());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = configured();
        config.log_level = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
