use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::db::models::{ChannelAdd, ChannelRemoval, Guild, ManagerAdd, ManagerRemoval, RaffleSettings};
use crate::db::SettingsStore;

/// Settings kept in process memory. Same contract as the Postgres store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    guilds: Mutex<HashMap<u64, Guild>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_guilds<T>(&self, f: impl FnOnce(&mut HashMap<u64, Guild>) -> T) -> T {
        let mut guilds = self.guilds.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guilds)
    }
}

fn settings_of(guilds: &mut HashMap<u64, Guild>, guild_id: u64) -> &mut RaffleSettings {
    let guild = guilds.entry(guild_id).or_insert_with(|| Guild {
        id: guild_id,
        created_at: Utc::now(),
        raffle: None,
    });
    guild.raffle.get_or_insert_with(RaffleSettings::default)
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn fetch(&self, guild_id: u64) -> anyhow::Result<Option<Guild>> {
        Ok(self.with_guilds(|g| g.get(&guild_id).cloned()))
    }

    async fn fetch_or_create(&self, guild_id: u64) -> anyhow::Result<Guild> {
        Ok(self.with_guilds(|g| {
            g.entry(guild_id)
                .or_insert_with(|| Guild { id: guild_id, created_at: Utc::now(), raffle: None })
                .clone()
        }))
    }

    async fn set_raffle_settings(&self, guild_id: u64, settings: &RaffleSettings) -> anyhow::Result<()> {
        self.with_guilds(|g| *settings_of(g, guild_id) = settings.clone());
        Ok(())
    }

    async fn add_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<ChannelAdd> {
        Ok(self.with_guilds(|g| {
            let settings = settings_of(g, guild_id);
            if settings.channels.contains(&channel_id) {
                ChannelAdd::AlreadyPresent
            } else {
                settings.channels.push(channel_id);
                ChannelAdd::Added
            }
        }))
    }

    async fn remove_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<ChannelRemoval> {
        Ok(self.with_guilds(|g| {
            let Some(settings) = g.get_mut(&guild_id).and_then(|guild| guild.raffle.as_mut()) else {
                return ChannelRemoval::NotPresent;
            };
            if !settings.channels.contains(&channel_id) {
                ChannelRemoval::NotPresent
            } else if settings.channels.len() <= 1 {
                ChannelRemoval::LastChannel
            } else {
                settings.channels.retain(|c| *c != channel_id);
                ChannelRemoval::Removed
            }
        }))
    }

    async fn add_managers(&self, guild_id: u64, users: &[u64]) -> anyhow::Result<Vec<ManagerAdd>> {
        Ok(self.with_guilds(|g| {
            let settings = settings_of(g, guild_id);
            users
                .iter()
                .map(|&user| {
                    if settings.managers.contains(&user) {
                        ManagerAdd::AlreadyManaging(user)
                    } else {
                        settings.managers.push(user);
                        ManagerAdd::Added(user)
                    }
                })
                .collect()
        }))
    }

    async fn remove_managers(&self, guild_id: u64, users: &[u64]) -> anyhow::Result<Vec<ManagerRemoval>> {
        Ok(self.with_guilds(|g| {
            let settings = g.get_mut(&guild_id).and_then(|guild| guild.raffle.as_mut());
            match settings {
                None => users.iter().map(|&u| ManagerRemoval::NotManaging(u)).collect(),
                Some(settings) => users
                    .iter()
                    .map(|&user| {
                        if settings.managers.contains(&user) {
                            settings.managers.retain(|m| *m != user);
                            ManagerRemoval::Removed(user)
                        } else {
                            ManagerRemoval::NotManaging(user)
                        }
                    })
                    .collect(),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_channel_cannot_be_removed() {
        let store = MemorySettingsStore::new();
        store.set_raffle_settings(1, &RaffleSettings { channels: vec![10], managers: vec![99] }).await.unwrap();

        assert_eq!(store.remove_channel(1, 10).await.unwrap(), ChannelRemoval::LastChannel);
        assert_eq!(store.add_channel(1, 11).await.unwrap(), ChannelAdd::Added);
        assert_eq!(store.add_channel(1, 11).await.unwrap(), ChannelAdd::AlreadyPresent);
        assert_eq!(store.remove_channel(1, 10).await.unwrap(), ChannelRemoval::Removed);

        let guild = store.fetch(1).await.unwrap().unwrap();
        assert_eq!(guild.raffle.unwrap().channels, vec![11]);
    }

    #[tokio::test]
    async fn fetch_or_create_is_idempotent() {
        let store = MemorySettingsStore::new();
        assert!(store.fetch(7).await.unwrap().is_none());
        let first = store.fetch_or_create(7).await.unwrap();
        store.add_managers(7, &[1]).await.unwrap();
        let second = store.fetch_or_create(7).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.raffle.unwrap().managers, vec![1]);
    }

    #[tokio::test]
    async fn managers_report_per_user() {
        let store = MemorySettingsStore::new();
        let added = store.add_managers(3, &[1, 2]).await.unwrap();
        assert_eq!(added, vec![ManagerAdd::Added(1), ManagerAdd::Added(2)]);
        let removed = store.remove_managers(3, &[2, 5]).await.unwrap();
        assert_eq!(removed, vec![ManagerRemoval::Removed(2), ManagerRemoval::NotManaging(5)]);
    }
}
