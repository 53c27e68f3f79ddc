use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use dashmap::DashMap;
use serenity::all::{
    Cache, ChannelId, CreateMessage, EditMessage, GuildId, Http, MessageId, OnlineStatus, UserId,
};

/// Outbound chat operations the raffle needs. Ids are platform snowflakes.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_channel_message(&self, channel_id: u64, content: &str) -> anyhow::Result<u64>;

    async fn edit_channel_message(&self, channel_id: u64, message_id: u64, content: &str) -> anyhow::Result<()>;

    async fn delete_channel_message(&self, channel_id: u64, message_id: u64) -> anyhow::Result<()>;

    async fn send_direct_message(&self, user_id: u64, content: &str) -> anyhow::Result<u64>;

    async fn edit_direct_message(&self, user_id: u64, message_id: u64, content: &str) -> anyhow::Result<()>;

    async fn is_user_online(&self, guild_id: u64, user_id: u64) -> bool;

    /// Best-effort name for message bodies; never fails.
    async fn display_name(&self, guild_id: u64, user_id: u64) -> String;
}

pub struct DiscordMessenger {
    http: Arc<Http>,
    cache: Arc<Cache>,
    dm_channels: DashMap<u64, ChannelId>,
}

impl DiscordMessenger {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache, dm_channels: DashMap::new() }
    }

    async fn dm_channel(&self, user_id: u64) -> anyhow::Result<ChannelId> {
        if let Some(id) = self.dm_channels.get(&user_id) {
            return Ok(*id.value());
        }
        let dm = UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .context("open dm channel")?;
        self.dm_channels.insert(user_id, dm.id);
        Ok(dm.id)
    }

    fn cached_name(&self, guild_id: u64, user_id: u64) -> Option<String> {
        let guild = self.cache.guild(GuildId::new(guild_id))?;
        let member = guild.members.get(&UserId::new(user_id))?;
        Some(
            member
                .nick
                .clone()
                .filter(|s| !s.is_empty())
                .or_else(|| member.user.global_name.clone().filter(|s| !s.is_empty()))
                .unwrap_or_else(|| member.user.name.clone()),
        )
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn send_channel_message(&self, channel_id: u64, content: &str) -> anyhow::Result<u64> {
        let msg = ChannelId::new(channel_id)
            .send_message(&self.http, CreateMessage::new().content(content))
            .await
            .context("send channel message")?;
        Ok(msg.id.get())
    }

    async fn edit_channel_message(&self, channel_id: u64, message_id: u64, content: &str) -> anyhow::Result<()> {
        ChannelId::new(channel_id)
            .edit_message(&self.http, MessageId::new(message_id), EditMessage::new().content(content))
            .await
            .context("edit channel message")?;
        Ok(())
    }

    async fn delete_channel_message(&self, channel_id: u64, message_id: u64) -> anyhow::Result<()> {
        ChannelId::new(channel_id)
            .delete_message(&self.http, MessageId::new(message_id))
            .await
            .context("delete channel message")?;
        Ok(())
    }

    async fn send_direct_message(&self, user_id: u64, content: &str) -> anyhow::Result<u64> {
        let channel = self.dm_channel(user_id).await?;
        let msg = channel
            .send_message(&self.http, CreateMessage::new().content(content))
            .await
            .context("send direct message")?;
        Ok(msg.id.get())
    }

    async fn edit_direct_message(&self, user_id: u64, message_id: u64, content: &str) -> anyhow::Result<()> {
        let channel = self.dm_channel(user_id).await?;
        channel
            .edit_message(&self.http, MessageId::new(message_id), EditMessage::new().content(content))
            .await
            .context("edit direct message")?;
        Ok(())
    }

    async fn is_user_online(&self, guild_id: u64, user_id: u64) -> bool {
        self.cache
            .guild(GuildId::new(guild_id))
            .and_then(|g| g.presences.get(&UserId::new(user_id)).map(|p| p.status))
            .map_or(false, |status| status == OnlineStatus::Online)
    }

    async fn display_name(&self, guild_id: u64, user_id: u64) -> String {
        if let Some(name) = self.cached_name(guild_id, user_id) {
            return name;
        }
        match GuildId::new(guild_id).member(&self.http, UserId::new(user_id)).await {
            Ok(m) => m
                .nick
                .filter(|s| !s.is_empty())
                .or_else(|| m.user.global_name.clone().filter(|s| !s.is_empty()))
                .unwrap_or(m.user.name),
            Err(_) => format!("user {user_id}"),
        }
    }
}
