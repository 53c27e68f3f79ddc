use serenity::all::{CommandInteraction, CommandOptionType, CreateCommand, CreateCommandOption};
use serenity::prelude::Context;

use super::opt_str;
use crate::raffle::Raffle;
use crate::utils::is_battle_tag;

pub fn definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("enter").description("Enter the running raffle"),
        CreateCommand::new("confirm")
            .description("Confirm you want to play after being drawn")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "battletag", "Your battle tag, e.g. NickName#1234")
                    .required(true),
            ),
        CreateCommand::new("issue")
            .description("Tell the raffle managers something is wrong")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "message", "What is wrong")
                    .required(true)
                    .max_length(1000),
            ),
        CreateCommand::new("withdraw").description("Give up your spot after being drawn"),
    ]
}

/// Guilds in the cache that have `user_id` as a member.
fn shared_guilds(ctx: &Context, user_id: u64) -> Vec<u64> {
    let user = serenity::all::UserId::new(user_id);
    ctx.cache
        .guilds()
        .into_iter()
        .filter(|g| ctx.cache.guild(*g).map_or(false, |guild| guild.members.contains_key(&user)))
        .map(|g| g.get())
        .collect()
}

/// The guild a command is meant for. Outside a guild: the only guild shared
/// with the user, otherwise the one where they were drawn.
async fn resolve_guild(ctx: &Context, cmd: &CommandInteraction, raffle: &Raffle) -> Option<u64> {
    if let Some(guild) = cmd.guild_id {
        return Some(guild.get());
    }
    let user_id = cmd.user.id.get();
    let shared = shared_guilds(ctx, user_id);
    if let [only] = shared.as_slice() {
        return Some(*only);
    }
    for guild_id in shared {
        if raffle.is_drawn(guild_id, user_id).await {
            return Some(guild_id);
        }
    }
    None
}

/// `None` when `name` is not a player command.
pub async fn run(name: &str, ctx: &Context, cmd: &CommandInteraction, raffle: &Raffle) -> Option<String> {
    if !matches!(name, "enter" | "confirm" | "issue" | "withdraw") {
        return None;
    }
    let user_id = cmd.user.id.get();
    let Some(guild_id) = resolve_guild(ctx, cmd, raffle).await else {
        return Some("I could not tell which server this is for. Please use this command in the server instead.".into());
    };
    tracing::debug!(guild_id, user_id, command = name, "player command");

    let reply = match name {
        "enter" => raffle.enter(guild_id, user_id).await,
        "confirm" => {
            let tag = opt_str(cmd, "battletag").unwrap_or_default().trim();
            if !is_battle_tag(tag) {
                return Some("That does not look like a battle tag. Use the form `NickName#1234`.".into());
            }
            raffle.confirm(guild_id, user_id, tag).await
        }
        "issue" => {
            let message = opt_str(cmd, "message").unwrap_or_default().trim();
            if message.is_empty() {
                return Some("Please describe the issue.".into());
            }
            raffle.issue(guild_id, user_id, message).await
        }
        _ => raffle.withdraw(guild_id, user_id).await,
    };
    Some(reply)
}
