use std::sync::Arc;

use anyhow::Context as _;
use dotenvy::dotenv;
use raffle_bot::config::Config;
use raffle_bot::db::{self, PgSettingsStore};
use raffle_bot::handlers::Handler;
use raffle_bot::kv::{KvStore, RedisStore};
use serenity::all::{Client, GatewayIntents};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let pool = db::init_pool(&config.database_url).await.context("postgres")?;
    let settings = Arc::new(PgSettingsStore::new(pool));

    let redis = RedisStore::open(&config.redis_url)?;
    redis.ping().await.context("redis ping")?;
    let kv: Arc<dyn KvStore> = Arc::new(redis);

    // Presences and members feed the manager online check and display names.
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_PRESENCES
        | GatewayIntents::DIRECT_MESSAGES;
    let handler = Handler::new(kv, settings, config.raffle.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .context("discord client")?;

    tracing::info!("starting gateway");
    client.start().await?;
    Ok(())
}
