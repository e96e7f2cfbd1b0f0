//! Layered application configuration.
//!
//! Sources, lowest priority first:
//! 1. compiled defaults
//! 2. JSON file (default `colloquy.json`, ignored when absent)
//! 3. `COLLOQUY_*` environment variables, `__` separating nested keys
//!    (e.g. `COLLOQUY_LIMITS__TURN_TIMEOUT_SECS=30`)
//! 4. the bare `PORT` and `HOST` variables

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use colloquy_core::AgentProfile;
use colloquy_engine::{ChatConfig, TurnLimits};
use colloquy_telemetry::{parse_level, LogFormat, TelemetryConfig};

use crate::server::ServerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "colloquy.json";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Controls how much diagnostic detail reaches clients and how logs look.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    Development,
    #[default]
    Production,
}

impl Deployment {
    pub fn exposes_detail(self) -> bool {
        self == Self::Development
    }

    pub fn log_format(self) -> LogFormat {
        match self {
            Self::Development => LogFormat::Pretty,
            Self::Production => LogFormat::Json,
        }
    }
}

/// Wait bounds, in whole seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub storage_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub turn_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = TurnLimits::default();
        Self {
            storage_timeout_secs: limits.storage_timeout.as_secs(),
            idle_timeout_secs: limits.idle_timeout.as_secs(),
            turn_timeout_secs: limits.turn_timeout.as_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn to_limits(&self) -> TurnLimits {
        TurnLimits {
            storage_timeout: Duration::from_secs(self.storage_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub app_name: String,
    pub user_id: String,
    pub deployment: Deployment,
    pub database_path: PathBuf,
    pub cors_origins: Vec<String>,
    pub agent: AgentProfile,
    pub limits: LimitsConfig,
    pub gemini_base_url: String,
    pub log_level: String,
    /// Per-target level overrides, e.g. `{"colloquy_store": "debug"}`.
    pub log_modules: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8000,
            app_name: "assistant".into(),
            user_id: "user".into(),
            deployment: Deployment::default(),
            database_path: PathBuf::from("colloquy.db"),
            cors_origins: vec!["http://localhost:3000".into()],
            agent: AgentProfile::default(),
            limits: LimitsConfig::default(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.into(),
            log_level: "info".into(),
            log_modules: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed("COLLOQUY_").split("__"))
            .merge(Env::raw().only(&["PORT", "HOST"]))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("user_id must not be empty".into()));
        }
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.model must not be empty".into()));
        }
        let limits = &self.limits;
        if limits.storage_timeout_secs == 0
            || limits.idle_timeout_secs == 0
            || limits.turn_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }
        self.telemetry_config()?;
        Ok(())
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            limits: self.limits.to_limits(),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            deployment: self.deployment,
            ..ServerConfig::default()
        }
    }

    pub fn telemetry_config(&self) -> Result<TelemetryConfig, ConfigError> {
        let invalid = |e: colloquy_telemetry::TelemetryError| ConfigError::Invalid(e.to_string());
        let log_level = parse_level(&self.log_level).map_err(invalid)?;
        let module_levels = self
            .log_modules
            .iter()
            .map(|(target, level)| Ok((target.clone(), parse_level(level).map_err(invalid)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(TelemetryConfig {
            log_level,
            module_levels,
            format: self.deployment.log_format(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8000);
        assert_eq!(config.app_name, "assistant");
        assert_eq!(config.user_id, "user");
        assert_eq!(config.deployment, Deployment::Production);
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.limits.to_limits(), TurnLimits::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_uses_defaults() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = AppConfig::load(Path::new("absent.json")).map_err(|e| e.to_string())?;
            assert_eq!(config, AppConfig::default());
            Ok(())
        });
    }

    #[test]
    fn file_then_env_then_legacy_vars() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "colloquy.json",
                r#"{
                    "port": 9000,
                    "deployment": "development",
                    "agent": { "model": "gemini-2.5-flash" },
                    "limits": { "turn_timeout_secs": 30 }
                }"#,
            )?;
            jail.set_env("COLLOQUY_APP_NAME", "helper");
            jail.set_env("COLLOQUY_LIMITS__IDLE_TIMEOUT_SECS", "15");
            jail.set_env("HOST", "0.0.0.0");

            let config = AppConfig::load(Path::new("colloquy.json")).map_err(|e| e.to_string())?;
            assert_eq!(config.port, 9000);
            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.app_name, "helper");
            assert_eq!(config.deployment, Deployment::Development);
            assert_eq!(config.agent.model, "gemini-2.5-flash");
            assert_eq!(config.agent.name, "assistant");
            assert_eq!(config.limits.turn_timeout_secs, 30);
            assert_eq!(config.limits.idle_timeout_secs, 15);
            assert_eq!(config.limits.storage_timeout_secs, 10);
            Ok(())
        });
    }

    #[test]
    fn legacy_port_beats_prefixed() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("COLLOQUY_PORT", "9100");
            jail.set_env("PORT", "9200");
            let config = AppConfig::load(Path::new(DEFAULT_CONFIG_FILE)).map_err(|e| e.to_string())?;
            assert_eq!(config.port, 9200);
            Ok(())
        });
    }

    #[test]
    fn bad_port_is_load_error() {
        Jail::expect_with(|jail| {
            jail.set_env("PORT", "not-a-port");
            let err = AppConfig::load(Path::new(DEFAULT_CONFIG_FILE)).unwrap_err();
            assert!(matches!(err, ConfigError::Load(_)));
            Ok(())
        });
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = AppConfig {
            limits: LimitsConfig {
                turn_timeout_secs: 0,
                ..LimitsConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_log_level_rejected() {
        let config = AppConfig {
            log_level: "chatty".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(config.telemetry_config().is_err());
    }

    #[test]
    fn module_levels_reach_telemetry() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "colloquy.json",
                r#"{ "log_level": "warn", "log_modules": { "colloquy_llm": "trace" } }"#,
            )?;
            jail.set_env("COLLOQUY_LOG_MODULES__COLLOQUY_STORE", "debug");

            let config = AppConfig::load(Path::new("colloquy.json")).map_err(|e| e.to_string())?;
            let telemetry = config.telemetry_config().map_err(|e| e.to_string())?;
            assert_eq!(
                telemetry.filter_directives(),
                "warn,colloquy_llm=trace,colloquy_store=debug"
            );
            Ok(())
        });
    }

    #[test]
    fn unknown_module_level_rejected() {
        let mut config = AppConfig::default();
        config.log_modules.insert("colloquy_store".into(), "loud".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn derived_configs() {
        let config = AppConfig {
            deployment: Deployment::Development,
            log_level: "debug".into(),
            ..AppConfig::default()
        };
        let chat = config.chat_config();
        assert_eq!(chat.app_name, "assistant");
        assert_eq!(chat.limits.turn_timeout, Duration::from_secs(180));

        let server = config.server_config();
        assert_eq!(server.port, 8000);
        assert!(server.deployment.exposes_detail());

        let telemetry = config.telemetry_config().unwrap();
        assert_eq!(telemetry.log_level, tracing::Level::DEBUG);
        assert_eq!(telemetry.format, LogFormat::Pretty);
    }
}
