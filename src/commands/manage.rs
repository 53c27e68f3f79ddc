use serenity::all::{CommandInteraction, CommandOptionType, CreateCommand, CreateCommandOption, Permissions};

use super::{opt_int, opt_str, opt_users};
use crate::raffle::{Origin, Raffle};
use crate::utils::parse_groups;

const MANAGER_SLOTS: usize = 5;

fn managed(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name)
        .description(description)
        .default_member_permissions(Permissions::MANAGE_CHANNELS)
        .dm_permission(false)
}

fn minutes_option() -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Integer, "minutes", "Close automatically after this many minutes")
        .min_int_value(1)
}

fn user_options(mut command: CreateCommand, verb: &str) -> CreateCommand {
    for slot in 1..=MANAGER_SLOTS {
        let name = if slot == 1 { "user".to_string() } else { format!("user{slot}") };
        command = command.add_option(CreateCommandOption::new(
            CommandOptionType::User,
            name,
            format!("User to {verb} (defaults to you)"),
        ));
    }
    command
}

pub fn definitions() -> Vec<CreateCommand> {
    vec![
        managed("raffle_start", "Start a new raffle").add_option(minutes_option()),
        managed("raffle_open", "Reopen a closed raffle for more entries").add_option(minutes_option()),
        managed("raffle_close", "Stop accepting entries"),
        managed("raffle_draw", "Draw winners from the entries").add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "teams",
            "Team sizes such as 6v6 or 12 (default 6v6)",
        )),
        managed("raffle_finish", "End the raffle and discard its state"),
        managed("raffle_status", "Post a live status card in this channel"),
        managed("raffle_add", "Announce the raffle in this channel"),
        managed("raffle_remove", "Stop announcing the raffle in this channel"),
        user_options(managed("raffle_manage", "Send raffle updates and issues to these users"), "add"),
        user_options(managed("raffle_unmanage", "Stop sending raffle updates to these users"), "remove"),
    ]
}

fn minutes(cmd: &CommandInteraction) -> Option<u64> {
    opt_int(cmd, "minutes").and_then(|m| u64::try_from(m).ok())
}

/// `None` when `name` is not a management command.
pub async fn run(name: &str, cmd: &CommandInteraction, raffle: &Raffle) -> Option<String> {
    if !name.starts_with("raffle_") {
        return None;
    }
    let Some(guild_id) = cmd.guild_id.map(|g| g.get()) else {
        return Some("This command can only be used in a server.".into());
    };
    let channel_id = cmd.channel_id.get();
    let user_id = cmd.user.id.get();
    tracing::debug!(guild_id, user_id, command = name, "raffle command");

    let reply = match name {
        "raffle_start" => {
            let origin = Origin { user: user_id, channel: Some(channel_id) };
            raffle.start(guild_id, origin, minutes(cmd)).await
        }
        "raffle_open" => raffle.open(guild_id, minutes(cmd)).await,
        "raffle_close" => raffle.close(guild_id).await,
        "raffle_draw" => match parse_groups(opt_str(cmd, "teams")) {
            Some(groups) => raffle.draw(guild_id, &groups).await,
            None => "Team sizes must be positive whole numbers, for example `6v6` or `12`.".into(),
        },
        "raffle_finish" => raffle.finish(guild_id).await,
        "raffle_status" => raffle.info(guild_id, channel_id).await,
        "raffle_add" => raffle.add_channel(guild_id, Some(channel_id)).await,
        "raffle_remove" => raffle.remove_channel(guild_id, Some(channel_id)).await,
        "raffle_manage" | "raffle_unmanage" => {
            let mut users = opt_users(cmd);
            if users.is_empty() {
                users.push(user_id);
            }
            if name == "raffle_manage" {
                raffle.add_managers(guild_id, &users).await
            } else {
                raffle.remove_managers(guild_id, &users).await
            }
        }
        _ => return None,
    };
    Some(reply)
}
