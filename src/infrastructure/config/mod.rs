//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    /// Command prefixes; the first one is shown in help text
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginConfig {
    pub directory: PathBuf,
    /// Register the compiled-in `ping` and `help` plugins
    #[serde(default = "default_true")]
    pub builtin: bool,
}

/// Watchdog settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SupervisorConfig {
    /// Directories watched for changes, besides the plugin directory
    pub watch: Vec<PathBuf>,
    /// Entry file whose change respawns the worker; defaults to the running binary
    pub entry: Option<PathBuf>,
    /// Paths matching any of these respawn the worker
    pub config_patterns: Vec<String>,
    /// Paths matching any of these are never acted on
    pub ignore_patterns: Vec<String>,
    pub debounce_ms: u64,
    pub restart_delay_ms: u64,
    pub kill_timeout_ms: u64,
}

/// Worker runtime settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkerConfig {
    /// Delay before reconnecting after a recoverable connection close
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdaptersConfig {
    pub telegram: Option<TelegramConfig>,
    pub console: Option<ConsoleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsoleConfig {
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watch: vec![PathBuf::from(".")],
            entry: None,
            config_patterns: vec![
                r"config\.ya?ml$".to_string(),
                r"\.env$".to_string(),
                r"Cargo\.toml$".to_string(),
            ],
            ignore_patterns: vec![
                r"(^|/)\.git(/|$)".to_string(),
                r"(^|/)target(/|$)".to_string(),
                r"~$".to_string(),
                r"\.swp$".to_string(),
            ],
            debounce_ms: 500,
            restart_delay_ms: 5_000,
            kill_timeout_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
        }
    }
}

impl WorkerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: "sambung-bot".to_string(),
                prefixes: vec!["/".to_string(), "!".to_string()],
            },
            plugins: PluginConfig {
                directory: PathBuf::from("./plugins"),
                builtin: true,
            },
            supervisor: SupervisorConfig::default(),
            worker: WorkerConfig::default(),
            adapters: AdaptersConfig {
                telegram: Some(TelegramConfig {
                    enabled: false,
                    token: None,
                }),
                console: Some(ConsoleConfig {
                    enabled: true,
                }),
            },
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults; env overrides apply either way
    pub fn load_or_default(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        Ok(config.with_env())
    }

    pub fn load_env() -> Self {
        Config::default().with_env()
    }

    /// Apply `BOT_TOKEN`, `BOT_PREFIX` and `PLUGINS_DIR`
    pub fn with_env(mut self) -> Self {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.set_token(token);
        }

        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            self.bot.prefixes = prefix
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(dir) = std::env::var("PLUGINS_DIR") {
            self.plugins.directory = PathBuf::from(dir);
        }

        self
    }

    /// Set the Telegram token and enable the adapter
    pub fn set_token(&mut self, token: impl Into<String>) {
        let tg = self.adapters.telegram.get_or_insert(TelegramConfig {
            enabled: true,
            token: None,
        });
        tg.token = Some(token.into());
        tg.enabled = true;
    }

    /// Token of the enabled Telegram adapter, if any
    pub fn telegram_token(&self) -> Option<&str> {
        self.adapters
            .telegram
            .as_ref()
            .filter(|tg| tg.enabled)
            .and_then(|tg| tg.token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefixes.iter().all(|p| p.is_empty()) {
            return Err(ConfigError::MissingField("bot.prefixes".to_string()));
        }
        if self.supervisor.restart_delay_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "supervisor.restart-delay-ms must be greater than zero".to_string(),
            ));
        }
        for pattern in self.supervisor.config_patterns.iter().chain(&self.supervisor.ignore_patterns) {
            regex_lite::Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidValue(format!("pattern '{}': {}", pattern, e)))?;
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_yaml() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("restart-delay-ms: 5000"));
        assert!(yaml.contains("debounce-ms: 500"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.bot.prefixes, vec!["/", "!"]);
        assert_eq!(parsed.supervisor.kill_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
bot:
  name: test
  prefixes: ["."]
plugins:
  directory: ./mods
adapters:
  telegram:
    enabled: true
    token: abc
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.plugins.builtin);
        assert_eq!(config.supervisor.debounce(), Duration::from_millis(500));
        assert_eq!(config.worker.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.telegram_token(), Some("abc"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut config = Config::default();
        config.supervisor.config_patterns.push("(".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_disabled_telegram_has_no_token() {
        let mut config = Config::default();
        assert_eq!(config.telegram_token(), None);
        config.set_token("t0k");
        assert_eq!(config.telegram_token(), Some("t0k"));
    }
}
