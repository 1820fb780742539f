//! Random picks and lookups over a guild's cached emojis, stickers and roles.

use poise::serenity_prelude as serenity;
use rand::seq::IndexedRandom;

/// Emoji mention string. Names whose first `_` segment is `a` are treated as
/// animated.
pub fn format_emoji(name: &str, id: serenity::EmojiId) -> String {
    if name.split('_').next() == Some("a") {
        format!("<a:{}:{}>", name, id)
    } else {
        format!("<:{}:{}>", name, id)
    }
}

pub fn random_formatted_emoji(guild: &serenity::Guild) -> Option<String> {
    let emojis: Vec<&serenity::Emoji> = guild.emojis.values().collect();
    let emoji = emojis.choose(&mut rand::rng())?;
    Some(format_emoji(&emoji.name, emoji.id))
}

/// `None` when the guild has no usable sticker.
pub fn random_available_sticker(guild: &serenity::Guild) -> Option<&serenity::Sticker> {
    let stickers: Vec<&serenity::Sticker> =
        guild.stickers.values().filter(|s| s.available).collect();
    stickers.choose(&mut rand::rng()).copied()
}

pub fn role_by_name<'a>(guild: &'a serenity::Guild, role_name: &str) -> Option<&'a serenity::Role> {
    find_named(guild.roles.values(), role_name, |role| role.name.as_str())
}

/// Members holding the role called `role_name`, ordered by user id.
pub fn users_with_role<'a>(guild: &'a serenity::Guild, role_name: &str) -> Vec<&'a serenity::Member> {
    let Some(role) = role_by_name(guild, role_name) else {
        return Vec::new();
    };

    let mut members = members_with_role(guild.members.values(), role.id, |m| m.roles.as_slice());
    members.sort_by_key(|m| m.user.id);
    members
}

fn find_named<'a, T, F>(items: impl IntoIterator<Item = &'a T>, name: &str, name_of: F) -> Option<&'a T>
where
    T: 'a,
    F: Fn(&T) -> &str,
{
    items.into_iter().find(|item| name_of(*item) == name)
}

fn members_with_role<'a, M, F>(
    members: impl IntoIterator<Item = &'a M>,
    role_id: serenity::RoleId,
    roles_of: F,
) -> Vec<&'a M>
where
    M: 'a,
    F: Fn(&M) -> &[serenity::RoleId],
{
    members
        .into_iter()
        .filter(|member| roles_of(*member).contains(&role_id))
        .collect()
}
