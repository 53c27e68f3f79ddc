pub mod manage;
pub mod player;

use serenity::all::{
    Command, CommandDataOptionValue, CommandInteraction, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use serenity::prelude::Context;

use crate::raffle::Raffle;

fn definitions() -> Vec<CreateCommand> {
    let mut all = manage::definitions();
    all.extend(player::definitions());
    all
}

pub async fn register_commands(ctx: &Context) -> anyhow::Result<()> {
    for command in definitions() {
        Command::create_global_command(&ctx.http, command).await?;
    }
    Ok(())
}

/// Runs the raffle command named by the interaction and answers it privately.
pub async fn handle(ctx: &Context, cmd: &CommandInteraction, raffle: &Raffle) -> anyhow::Result<()> {
    let name = cmd.data.name.as_str();
    let reply = if let Some(reply) = manage::run(name, cmd, raffle).await {
        reply
    } else if let Some(reply) = player::run(name, ctx, cmd, raffle).await {
        reply
    } else {
        tracing::debug!(command = name, "ignoring unknown command");
        return Ok(());
    };
    respond(ctx, cmd, reply).await
}

pub async fn respond(ctx: &Context, cmd: &CommandInteraction, content: impl Into<String>) -> anyhow::Result<()> {
    let response = CreateInteractionResponseMessage::new().content(content).ephemeral(true);
    cmd.create_response(&ctx.http, CreateInteractionResponse::Message(response)).await?;
    Ok(())
}

pub(crate) fn opt_str<'a>(cmd: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    cmd.data.options.iter().find(|o| o.name == name).and_then(|o| match &o.value {
        CommandDataOptionValue::String(s) => Some(s.as_str()),
        _ => None,
    })
}

pub(crate) fn opt_int(cmd: &CommandInteraction, name: &str) -> Option<i64> {
    cmd.data.options.iter().find(|o| o.name == name).and_then(|o| match o.value {
        CommandDataOptionValue::Integer(i) => Some(i),
        _ => None,
    })
}

/// Every user option in declaration order, without duplicates.
pub(crate) fn opt_users(cmd: &CommandInteraction) -> Vec<u64> {
    let mut users: Vec<u64> = Vec::new();
    for option in &cmd.data.options {
        if let CommandDataOptionValue::User(id) = option.value {
            if !users.contains(&id.get()) {
                users.push(id.get());
            }
        }
    }
    users
}
