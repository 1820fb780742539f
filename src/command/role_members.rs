use crate::Context;
use crate::Error;
use crate::utils;

// Keeps the reply under the message length limit
const MAX_LISTED: usize = 50;

#[poise::command(prefix_command, slash_command, rename = "role-members", guild_only)]
pub async fn role_members(
    ctx: Context<'_>,
    #[description = "Exact name of the role"]
    #[rest]
    role_name: String,
) -> Result<(), Error> {
    let response = {
        let guild = ctx.guild().ok_or("Guild not found in cache")?;

        if utils::role_by_name(&guild, &role_name).is_none() {
            format!("There is no role named **{}** on this server.", role_name)
        } else {
            let members = utils::users_with_role(&guild, &role_name);
            if members.is_empty() {
                format!("Nobody has the **{}** role.", role_name)
            } else {
                let mut response = format!("**Members with {} ({}):**\n", role_name, members.len());
                for member in members.iter().take(MAX_LISTED) {
                    response.push_str(&format!("- {}\n", member.display_name()));
                }
                if members.len() > MAX_LISTED {
                    response.push_str(&format!("...and {} more\n", members.len() - MAX_LISTED));
                }
                response
            }
        }
    };

    ctx.say(response).await?;
    Ok(())
}
