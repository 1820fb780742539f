use crate::Context;
use crate::Error;

/// Shows the game the bot is currently playing.
#[poise::command(prefix_command, slash_command, rename = "now-playing")]
pub async fn now_playing(ctx: Context<'_>) -> Result<(), Error> {
    match ctx.data().conversation.current_game() {
        Some(game) => {
            ctx.say(format!("Currently playing **{game}**.")).await?;
        }
        None => {
            ctx.say("Not playing anything yet.").await?;
        }
    }

    Ok(())
}
