use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A guild the bot has run raffle commands in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Guild {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub raffle: Option<RaffleSettings>,
}

/// Where a guild's raffle is announced and who gets the private status cards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RaffleSettings {
    pub channels: Vec<u64>,
    pub managers: Vec<u64>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct GuildRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct SettingsRow {
    pub guild_id: i64,
    pub channels: Vec<i64>,
    pub managers: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}

impl From<SettingsRow> for RaffleSettings {
    fn from(row: SettingsRow) -> Self {
        Self {
            channels: row.channels.into_iter().map(|c| c as u64).collect(),
            managers: row.managers.into_iter().map(|m| m as u64).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAdd {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRemoval {
    Removed,
    NotPresent,
    /// Refused because the raffle would be left without a channel.
    LastChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerAdd {
    Added(u64),
    AlreadyManaging(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerRemoval {
    Removed(u64),
    NotManaging(u64),
}
