//! Configuration management

use clap::Args;
use config::builder::DefaultState;
use config::{Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid extensions configuration: {0}")]
    InvalidExtensions(String),

    #[error("Invalid runtime configuration: {0}")]
    InvalidRuntime(String),

    #[error("Invalid automation configuration: {0}")]
    InvalidAutomation(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub extensions: ExtensionsConfig,
    pub runtime: RuntimeConfig,
    pub automation: AutomationConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(args: &ConfigArgs) -> Result<Self, ConfigError> {
        // 1. Start with defaults (lowest priority)
        let mut builder = Self::defaults()?;

        // 2. Load from config file if specified (medium priority)
        if let Some(config_path) = &args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // 3. Override with environment variables (higher priority)
        // Example: STREAMBOX_AUTOMATION__OVERALL_TIMEOUT_MS=60000
        builder = builder.add_source(
            Environment::with_prefix("STREAMBOX")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Override with CLI arguments (highest priority)
        if let Some(dir) = &args.extensions_dir {
            builder = builder.set_override("extensions.root_dir", dir.display().to_string())?;
        }
        if let Some(data_dir) = &args.data_dir {
            builder = builder.set_override("storage.data_dir", data_dir.display().to_string())?;
        }
        if let Some(log_level) = &args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if args.headful {
            builder = builder.set_override("automation.headless", false)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = Self::defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults with no file, environment or CLI layers applied
    pub fn default_config() -> Result<Self, ConfigError> {
        let config: Config = Self::defaults()?.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<Builder<DefaultState>, ConfigError> {
        let builder = ConfigBuilder::builder()
            .set_default("extensions.root_dir", "./extensions")?
            .set_default("runtime.http_timeout_secs", 30)?
            .set_default("runtime.connect_timeout_secs", 10)?
            .set_default("runtime.browser_timeout_secs", 60)?
            .set_default("runtime.script_timeout_secs", 120)?
            .set_default("runtime.user_agent", DEFAULT_USER_AGENT)?
            .set_default("automation.overall_timeout_ms", 45_000)?
            .set_default("automation.settle_delay_ms", 1_500)?
            .set_default("automation.navigation_timeout_ms", 30_000)?
            .set_default("automation.headless", true)?
            .set_default("automation.user_agent", DEFAULT_USER_AGENT)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .set_default("logging.output", "stderr")?
            .set_default("logging.max_file_size", 10485760)? // 10 MB
            .set_default("logging.max_backups", 5)?
            .set_default("storage.data_dir", "./data")?
            .set_default("storage.database_file", "storage.db")?
            .set_default("storage.pool_size", 4)?
            .set_default("storage.busy_timeout_ms", 5000)?;

        Ok(builder)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extensions.validate()?;
        self.runtime.validate()?;
        self.automation.validate()?;
        self.logging.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Clone, Args)]
pub struct ConfigArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding installed extensions
    #[arg(long, value_name = "DIR", global = true)]
    pub extensions_dir: Option<PathBuf>,

    /// Directory for the durable key-value store
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Show the automation browser window
    #[arg(long, global = true)]
    pub headful: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionsConfig {
    pub root_dir: PathBuf,
}

impl ExtensionsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidExtensions("root_dir cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub browser_timeout_secs: u64,
    /// Wall-clock bound on one script evaluation plus call
    pub script_timeout_secs: u64,
    pub user_agent: String,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidRuntime("http_timeout_secs must be greater than 0".to_string()));
        }

        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > self.http_timeout_secs {
            return Err(ConfigError::InvalidRuntime(
                "connect_timeout_secs must be between 1 and http_timeout_secs".to_string(),
            ));
        }

        if self.browser_timeout_secs == 0 {
            return Err(ConfigError::InvalidRuntime("browser_timeout_secs must be greater than 0".to_string()));
        }

        if self.script_timeout_secs == 0 {
            return Err(ConfigError::InvalidRuntime("script_timeout_secs must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            connect_timeout_secs: 10,
            browser_timeout_secs: 60,
            script_timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    pub overall_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub navigation_timeout_ms: u64,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: String,
}

impl AutomationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.overall_timeout_ms == 0 {
            return Err(ConfigError::InvalidAutomation("overall_timeout_ms must be greater than 0".to_string()));
        }

        if self.settle_delay_ms >= self.overall_timeout_ms {
            return Err(ConfigError::InvalidAutomation(
                "settle_delay_ms must be shorter than overall_timeout_ms".to_string(),
            ));
        }

        if self.navigation_timeout_ms == 0 {
            return Err(ConfigError::InvalidAutomation("navigation_timeout_ms must be greater than 0".to_string()));
        }

        if let Some(path) = &self.chrome_executable {
            if !path.exists() {
                return Err(ConfigError::InvalidAutomation(format!(
                    "chrome_executable does not exist: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            overall_timeout_ms: 45_000,
            settle_delay_ms: 1_500,
            navigation_timeout_ms: 30_000,
            headless: true,
            chrome_executable: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging("max_file_size must be greater than 0".to_string()));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("data_dir cannot be empty".to_string()));
        }

        if self.database_file.is_empty() {
            return Err(ConfigError::InvalidStorage("database_file cannot be empty".to_string()));
        }

        if self.pool_size == 0 {
            return Err(ConfigError::InvalidStorage("pool_size must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}
