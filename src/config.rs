//! Bot configuration.
//!
//! Secrets and ids come from the environment (a `.env` file is loaded by
//! `main`), everything else lives in a TOML file whose path is taken from
//! `BOT_CONFIG`.

use poise::serenity_prelude as serenity;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::steam::SteamId;

pub const DEFAULT_CONFIG_PATH: &str = "bot.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables of the hourly presence task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub interval_minutes: u64,
    /// A post is forced once this many cycles pass without one
    pub post_guarantee: u32,
    pub roast_chance_percent: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            post_guarantee: 5,
            roast_chance_percent: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SteamConfig {
    pub owned_games_url: String,
    pub store_url: String,
    /// Store language for game descriptions
    pub locale: String,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            owned_games_url: crate::steam::OWNED_GAMES_URL.to_string(),
            store_url: crate::steam::STORE_URL.to_string(),
            locale: "russian".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub system_prompt: String,
    pub max_history: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a sarcastic but friendly member of this Discord server. \
                            Answer in a single short paragraph."
                .to_string(),
            max_history: 30,
        }
    }
}

/// Layout of the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    presence: PresenceConfig,
    steam: SteamConfig,
    conversation: ConversationConfig,
    /// Discord user id -> SteamID64, both written as strings
    links: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,
    pub steam_api_key: String,
    pub tenor_api_key: String,
    pub main_chat_id: serenity::ChannelId,
    pub llm: LlmConfig,
    pub presence: PresenceConfig,
    pub steam: SteamConfig,
    pub conversation: ConversationConfig,
    pub user_links: HashMap<serenity::UserId, SteamId>,
}

impl Settings {
    /// Reads the environment and the config file it points at.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("BOT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = read_file_config(Path::new(&path))?;

        let main_chat_id = required_env("MAIN_CHAT_ID")?;
        let main_chat_id = parse_id("MAIN_CHAT_ID", &main_chat_id)?;

        Ok(Self {
            discord_token: required_env("DISCORD_TOKEN")?,
            steam_api_key: required_env("STEAM_API_KEY")?,
            tenor_api_key: required_env("TENOR_API_KEY")?,
            main_chat_id: serenity::ChannelId::new(main_chat_id),
            llm: LlmConfig {
                api_url: std::env::var("LLM_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
                model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            },
            user_links: parse_links(&file.links)?,
            presence: file.presence,
            steam: file.steam,
            conversation: file.conversation,
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

fn parse_id(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

/// A missing file is not an error: every section has defaults, only the
/// links would be empty.
fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        tracing::warn!("Config file {:?} not found, using defaults", path);
        return Ok(FileConfig::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&raw)?)
}

fn parse_links(
    raw: &HashMap<String, String>,
) -> Result<HashMap<serenity::UserId, SteamId>, ConfigError> {
    raw.iter()
        .map(|(user, steam)| -> Result<_, ConfigError> {
            let user_id = parse_id("links", user)?;
            let steam_id = parse_id("links", steam)?;
            Ok((serenity::UserId::new(user_id), SteamId(steam_id)))
        })
        .collect()
}
