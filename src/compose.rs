//! Builds the "I'm going to play ..." announcement through the completion
//! backend.

use poise::serenity_prelude as serenity;
use rand::Rng;

use crate::conversation::ConversationStore;
use crate::llm::{ChatMessage, LlmError, TextGenerator, collect_reply};
use crate::steam::OwnedGame;

/// What the announcement is about.
#[derive(Debug, Clone)]
pub struct GameAnnouncement<'a> {
    pub user_id: serenity::UserId,
    pub game: &'a OwnedGame,
    pub description: Option<&'a str>,
    pub roast: bool,
}

/// Minutes rendered as hours with one decimal place.
pub fn format_hours(minutes: u64) -> String {
    format!("{:.1}", minutes as f64 / 60.0)
}

/// Rolls whether the announcement mocks the user's taste.
pub fn roll_roast<R: Rng + ?Sized>(rng: &mut R, chance_percent: u32) -> bool {
    rng.random_range(1..=100) <= chance_percent
}

pub fn build_game_prompt(announcement: &GameAnnouncement<'_>) -> String {
    let game = &announcement.game.name;
    let hours = format_hours(announcement.game.playtime_forever);

    let mut prompt = format!(
        "Ping <@{}> and write a message saying that you are going to play {}. ",
        announcement.user_id, game
    );

    match announcement.description {
        Some(description) => prompt.push_str(&format!(
            "You MUST describe the game in your message using this information about it: {}. \
             Use the description to explain what kind of game it is",
            description
        )),
        None => prompt.push_str(
            "You MUST briefly describe what kind of game it is from what you know about it",
        ),
    }

    prompt.push_str(&format!(
        ". You MUST mention that you took this game from the user's library. \
         The user has {hours} hours in this game - you MUST separately mention \
         that the user played {hours} hours"
    ));

    if announcement.roast {
        prompt.push_str(". You MUST say something mean and toxic about their choice of games, mock their taste");
    }

    prompt
}

/// Generates the announcement text on top of the channel's history.
pub async fn compose_game_message(
    generator: &dyn TextGenerator,
    conversation: &ConversationStore,
    channel_id: serenity::ChannelId,
    guild_name: Option<&str>,
    announcement: &GameAnnouncement<'_>,
) -> Result<String, LlmError> {
    conversation.ensure_system_messages(channel_id, guild_name);

    let mut messages = conversation.history(channel_id);
    messages.push(ChatMessage::user(build_game_prompt(announcement)));

    let fragments = generator.stream_reply(messages).await?;
    collect_reply(fragments).await
}
