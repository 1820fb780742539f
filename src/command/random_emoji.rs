use crate::Context;
use crate::Error;
use crate::utils;

#[poise::command(prefix_command, slash_command, rename = "random-emoji", guild_only)]
pub async fn random_emoji(ctx: Context<'_>) -> Result<(), Error> {
    let emoji = {
        let guild = ctx.guild().ok_or("Guild not found in cache")?;
        utils::random_formatted_emoji(&guild)
    };

    match emoji {
        Some(emoji) => {
            ctx.say(emoji).await?;
        }
        None => {
            ctx.say("This server has no custom emojis.").await?;
        }
    }

    Ok(())
}
