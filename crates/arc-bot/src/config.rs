//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use arc_chat::Pacing;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "ARCBOT_CONFIG";
/// Environment variable supplying the completion API token
pub const TOKEN_ENV: &str = "ARCBOT_AI_TOKEN";
/// Config file used when nothing else is given
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Configuration for arcbot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log at debug level
    pub debug: bool,
    /// Root for conversation histories and the notebook
    pub data_dir: PathBuf,
    /// Static part of the system prompt
    pub system_prompt_file: PathBuf,
    pub ai: AiConfig,
    pub qqbot: QqBotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            data_dir: PathBuf::from("data"),
            system_prompt_file: PathBuf::from("config/system_prompt.txt"),
            ai: AiConfig::default(),
            qqbot: QqBotConfig::default(),
        }
    }
}

/// Completion endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Full chat completions URL
    pub api_url: String,
    pub token: String,
    pub model: String,
    pub max_context_tokens: u32,
    /// Longest silence tolerated while streaming a reply
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            token: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_context_tokens: arc_chat::conversation::DEFAULT_MAX_CONTEXT_TOKENS,
            request_timeout_secs: 120,
        }
    }
}

/// NapCat connection and chat behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QqBotConfig {
    pub ws_url: String,
    pub token: String,
    /// Group messages must start with this to be answered
    pub group_prefix: String,
    /// QQ ids allowed to reset group histories
    pub admin_qq: Vec<String>,
    pub reconnect_delay_secs: u64,
    pub min_send_delay_ms: u64,
    pub max_send_delay_ms: u64,
    pub max_concurrent_exchanges: usize,
}

impl Default for QqBotConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:3001".to_string(),
            token: String::new(),
            group_prefix: "#".to_string(),
            admin_qq: Vec::new(),
            reconnect_delay_secs: 5,
            min_send_delay_ms: 1000,
            max_send_delay_ms: 3000,
            max_concurrent_exchanges: arc_chat::dispatch::DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl QqBotConfig {
    pub fn pacing(&self) -> Pacing {
        Pacing::new(self.min_send_delay_ms, self.max_send_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Config {
    /// Resolve the config file path: explicit flag, then `ARCBOT_CONFIG`,
    /// then the default location
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Load config from file. A missing file yields the defaults; a file
    /// that does not parse is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            eprintln!(
                "Warning: config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the example config if no file exists yet
    pub fn init(path: &Path) -> std::io::Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())?;
        Ok(path.to_path_buf())
    }

    /// API token from config, falling back to `ARCBOT_AI_TOKEN`
    pub fn api_token(&self) -> Option<String> {
        arc_ai::providers::get_api_key(Some(self.ai.token.as_str()), TOKEN_ENV).ok()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.request_timeout_secs.max(1))
    }

    pub fn notebook_path(&self) -> PathBuf {
        self.data_dir.join("notebook.json")
    }
}

/// Generate an example config file content
pub fn example_config() -> &'static str {
    r##"# arcbot configuration file
# Place at config/config.toml, or point ARCBOT_CONFIG / --config at it

# Log at debug level
debug = false

# Conversation histories and the notebook live here
data_dir = "data"

# Static part of the system prompt
system_prompt_file = "config/system_prompt.txt"

[ai]
# Any OpenAI-compatible chat completions endpoint
api_url = "https://api.openai.com/v1/chat/completions"
# May be left empty and supplied via ARCBOT_AI_TOKEN
token = ""
model = "gpt-4o-mini"
# Estimated-token budget for the context sent with each message
max_context_tokens = 15000
# Give up on a reply after this many seconds without data
request_timeout_secs = 120

[qqbot]
# NapCat forward websocket
ws_url = "ws://127.0.0.1:3001"
token = ""
# Group messages starting with this prefix are answered
group_prefix = "#"
# Users allowed to run /arcreset <group_id>
admin_qq = ["10001"]
reconnect_delay_secs = 5
# Random pause between the parts of a multi-part reply
min_send_delay_ms = 1000
max_send_delay_ms = 3000
max_concurrent_exchanges = 16
"##
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.ai.max_context_tokens, 15000);
        assert_eq!(config.qqbot.group_prefix, "#");
        assert_eq!(config.qqbot.admin_qq, vec!["10001"]);
        assert_eq!(config.qqbot.pacing(), Pacing::new(1000, 3000));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse("[ai]\nmodel = \"local\"\n").unwrap();
        assert_eq!(config.ai.model, "local");
        assert_eq!(config.ai.request_timeout_secs, 120);
        assert_eq!(config.qqbot.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.qqbot.max_concurrent_exchanges, 16);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(Config::parse("[ai]\nmax_context_tokens = \"lots\"\n").is_err());
    }

    #[test]
    fn test_init_writes_example_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/config.toml");

        Config::init(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), example_config());

        fs::write(&path, "debug = true\n").unwrap();
        Config::init(&path).unwrap();
        assert!(Config::load(&path).unwrap().debug);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.qqbot.ws_url, "ws://127.0.0.1:3001");
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Config::config_path(Some(Path::new("/etc/arcbot.toml")));
        assert_eq!(path, PathBuf::from("/etc/arcbot.toml"));
    }
}
