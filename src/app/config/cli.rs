use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ConfigError, LogFormat, LogLevel};
use crate::client::ClientConfig;
use crate::domain::{PlatformCode, Stage};
use crate::orchestrator::{OrchestratorConfig, SubmitOptions};

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Drives a platform's login/collect/filter/deliver pipeline", long_about = None)]
#[serde(default)]
pub struct Config {
    /// Base URL of the task backend
    #[arg(long, env = "TASK_API_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Platform code, e.g. boss
    #[arg(long, env = "TASK_PLATFORM", default_value = "boss")]
    pub platform: String,

    /// Bearer token sent with every request
    #[arg(long, env = "TASK_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Status poll interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "2500")]
    pub poll_interval_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Fail a stage that stays running longer than this many seconds (disabled if unset)
    #[arg(long, env = "STAGE_TIMEOUT_SECS")]
    pub stage_timeout_secs: Option<u64>,

    /// Stages to run, comma separated
    #[arg(
        long,
        env = "STAGES",
        value_delimiter = ',',
        default_value = "login,collect,filter,deliver"
    )]
    pub stages: Vec<Stage>,

    /// Submit a single quick-delivery job instead of the staged pipeline
    #[arg(long, env = "QUICK_DELIVERY")]
    pub quick_delivery: bool,

    /// Actually send applications during DELIVER (dry run otherwise)
    #[arg(long, env = "ENABLE_ACTUAL_DELIVERY")]
    pub enable_actual_delivery: bool,

    /// JSON file with per-stage config objects keyed by stage name
    #[arg(long, env = "STAGE_CONFIG_FILE")]
    pub stage_config_file: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub poll_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub stage_timeout: Option<Duration>,

    #[serde(skip)]
    #[arg(skip)]
    pub stage_configs: BTreeMap<Stage, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            platform: "boss".to_string(),
            api_token: None,
            poll_interval_ms: 2500,
            request_timeout_secs: 30,
            stage_timeout_secs: None,
            stages: Stage::ALL.to_vec(),
            quick_delivery: false,
            enable_actual_delivery: false,
            stage_config_file: None,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            poll_interval: Duration::from_millis(2500),
            request_timeout: Duration::from_secs(30),
            stage_timeout: None,
            stage_configs: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses arguments and environment; a `--config-file` replaces them entirely.
    pub fn load<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Self::from_args(args)?;
        match &config.config_file {
            Some(path) => Self::from_file(path),
            None => Ok(config),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.poll_interval = Duration::from_millis(self.poll_interval_ms);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.stage_timeout = self.stage_timeout_secs.map(Duration::from_secs);

        self.stages.sort();
        self.stages.dedup();

        self.stage_configs = match &self.stage_config_file {
            Some(path) => load_stage_configs(path)?,
            None => BTreeMap::new(),
        };
        Ok(())
    }

    pub fn platform_code(&self) -> Result<PlatformCode, ConfigError> {
        PlatformCode::new(&self.platform).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            timeout: self.request_timeout,
            auth_token: self.api_token.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: self.poll_interval,
            stage_timeout: self.stage_timeout,
        }
    }

    pub fn submit_options(&self, stage: Stage) -> SubmitOptions {
        SubmitOptions {
            config: self.stage_configs.get(&stage).cloned(),
            enable_actual_delivery: self.enable_actual_delivery,
        }
    }
}

fn load_stage_configs(path: &Path) -> Result<BTreeMap<Stage, Value>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let configs: BTreeMap<Stage, Value> = serde_json::from_str(&content)?;
    if let Some((stage, _)) = configs.iter().find(|(_, value)| !value.is_object()) {
        return Err(ConfigError::InvalidConfig(format!(
            "config for stage '{stage}' in {} must be a JSON object",
            path.display()
        )));
    }
    Ok(configs)
}
