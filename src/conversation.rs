//! Per-channel conversation history shared between the presence task and
//! the text-generation backend.

use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::config::ConversationConfig;
use crate::llm::ChatMessage;

#[derive(Debug, Default)]
struct ChannelHistory {
    /// Set once the channel has been prepared for generation
    seeded: bool,
    guild_name: Option<String>,
    /// User and assistant messages only, oldest first
    messages: Vec<ChatMessage>,
}

pub struct ConversationStore {
    config: ConversationConfig,
    channels: DashMap<serenity::ChannelId, ChannelHistory>,
    current_game: RwLock<Option<String>>,
}

impl ConversationStore {
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            current_game: RwLock::new(None),
        }
    }

    /// Marks the channel as one whose history starts with system messages.
    /// Messages recorded before this call keep their place after them.
    pub fn ensure_system_messages(&self, channel_id: serenity::ChannelId, guild_name: Option<&str>) {
        let mut channel = self.channels.entry(channel_id).or_default();
        channel.seeded = true;
        if let Some(name) = guild_name {
            channel.guild_name = Some(name.to_string());
        }
    }

    /// System messages (built from the current state) followed by the
    /// recorded messages.
    pub fn history(&self, channel_id: serenity::ChannelId) -> Vec<ChatMessage> {
        let Some(channel) = self.channels.get(&channel_id) else {
            return Vec::new();
        };

        let mut history = if channel.seeded {
            self.system_messages(channel.guild_name.as_deref())
        } else {
            Vec::new()
        };
        history.extend(channel.messages.iter().cloned());
        history
    }

    pub fn add_user_message(&self, channel_id: serenity::ChannelId, content: impl Into<String>) {
        self.push(channel_id, ChatMessage::user(content));
    }

    pub fn add_assistant_message(&self, channel_id: serenity::ChannelId, content: impl Into<String>) {
        self.push(channel_id, ChatMessage::assistant(content));
    }

    pub fn set_current_game(&self, name: &str) {
        *self.write_current_game() = Some(name.to_string());
    }

    pub fn current_game(&self) -> Option<String> {
        self.read_current_game().clone()
    }

    fn push(&self, channel_id: serenity::ChannelId, message: ChatMessage) {
        let mut channel = self.channels.entry(channel_id).or_default();
        channel.messages.push(message);

        let excess = channel.messages.len().saturating_sub(self.config.max_history);
        channel.messages.drain(..excess);
    }

    fn system_messages(&self, guild_name: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.config.system_prompt.clone())];

        if let Some(name) = guild_name {
            messages.push(ChatMessage::system(format!(
                "You are chatting on the server \"{}\".",
                name
            )));
        }

        if let Some(game) = self.current_game() {
            messages.push(ChatMessage::system(format!("You are currently playing {}.", game)));
        }

        messages
    }

    // A panic while holding the lock leaves a plain `Option<String>` behind,
    // which is still valid, so poisoning is logged and then ignored.
    fn read_current_game(&self) -> RwLockReadGuard<'_, Option<String>> {
        self.current_game.read().unwrap_or_else(|poisoned| {
            warn!("Current game lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_current_game(&self) -> RwLockWriteGuard<'_, Option<String>> {
        self.current_game.write().unwrap_or_else(|poisoned| {
            warn!("Current game lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
