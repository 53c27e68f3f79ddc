use std::sync::Arc;

use once_cell::sync::OnceCell;
use serenity::all::{Context, EventHandler, Interaction, Ready};
use serenity::async_trait;

use crate::config::RaffleConfig;
use crate::db::SettingsStore;
use crate::kv::KvStore;
use crate::messaging::DiscordMessenger;
use crate::raffle::Raffle;

/// Gateway events. The raffle service needs the client's http and cache, so it
/// is built on the first `ready`.
pub struct Handler {
    kv: Arc<dyn KvStore>,
    settings: Arc<dyn SettingsStore>,
    config: RaffleConfig,
    raffle: OnceCell<Raffle>,
}

impl Handler {
    pub fn new(kv: Arc<dyn KvStore>, settings: Arc<dyn SettingsStore>, config: RaffleConfig) -> Self {
        Self { kv, settings, config, raffle: OnceCell::new() }
    }

    fn raffle(&self, ctx: &Context) -> &Raffle {
        self.raffle.get_or_init(|| {
            let messenger = DiscordMessenger::new(ctx.http.clone(), ctx.cache.clone());
            Raffle::new(self.kv.clone(), self.settings.clone(), Arc::new(messenger), self.config.clone())
        })
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected");

        if let Err(e) = crate::commands::register_commands(&ctx).await {
            tracing::error!(error = %format!("{e:#}"), "failed to register commands");
        }

        // Pick up raffles that were running before a restart. Guilds without
        // one stop on their first tick.
        let raffle = self.raffle(&ctx);
        for guild in &ready.guilds {
            raffle.ensure_monitor(guild.id.get());
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(cmd) = interaction else {
            return;
        };
        let raffle = self.raffle(&ctx).clone();
        if let Err(e) = crate::commands::handle(&ctx, &cmd, &raffle).await {
            tracing::warn!(command = %cmd.data.name, error = %format!("{e:#}"), "command failed");
        }
    }
}
