use crate::Context;
use crate::Error;
use crate::utils;
use poise::serenity_prelude as serenity;

#[poise::command(prefix_command, slash_command, rename = "random-sticker", guild_only)]
pub async fn random_sticker(ctx: Context<'_>) -> Result<(), Error> {
    let sticker = {
        let guild = ctx.guild().ok_or("Guild not found in cache")?;
        utils::random_available_sticker(&guild).map(|s| (s.id, s.name.clone()))
    };

    let Some((sticker_id, name)) = sticker else {
        ctx.say("This server has no available stickers.").await?;
        return Ok(());
    };

    ctx.say(format!("Here's **{name}**")).await?;
    ctx.channel_id()
        .send_message(ctx, serenity::CreateMessage::new().add_sticker_id(sticker_id))
        .await?;

    Ok(())
}
