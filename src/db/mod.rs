use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod memory;
pub mod models;
pub mod repo;

pub use memory::MemorySettingsStore;
pub use models::{ChannelAdd, ChannelRemoval, Guild, ManagerAdd, ManagerRemoval, RaffleSettings};
pub use repo::PgSettingsStore;

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Durable per-guild raffle settings: the announcement channels and the
/// managers. The channel list never shrinks below one entry through
/// `remove_channel`.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn fetch(&self, guild_id: u64) -> anyhow::Result<Option<Guild>>;

    /// Idempotent; never touches existing settings.
    async fn fetch_or_create(&self, guild_id: u64) -> anyhow::Result<Guild>;

    async fn set_raffle_settings(&self, guild_id: u64, settings: &RaffleSettings) -> anyhow::Result<()>;

    async fn add_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<ChannelAdd>;

    async fn remove_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<ChannelRemoval>;

    async fn add_managers(&self, guild_id: u64, users: &[u64]) -> anyhow::Result<Vec<ManagerAdd>>;

    async fn remove_managers(&self, guild_id: u64, users: &[u64]) -> anyhow::Result<Vec<ManagerRemoval>>;
}
