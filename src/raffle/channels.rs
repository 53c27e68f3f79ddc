use super::{Keys, Raffle, RaffleResult};
use crate::db::{ChannelAdd, ChannelRemoval, ManagerAdd, ManagerRemoval};
use crate::kv::Transaction;
use crate::utils::mention_user;

impl Raffle {
    /// Adds the channel the command was issued in. `None` outside guild channels.
    pub async fn add_channel(&self, guild_id: u64, channel_id: Option<u64>) -> String {
        let Some(channel_id) = channel_id else {
            return "This command can only be performed in guild channels. If you want to personally receive raffle results, look at `/raffle_manage`".into();
        };
        Self::respond(guild_id, "add_channel", self.try_add_channel(guild_id, channel_id).await)
    }

    async fn try_add_channel(&self, guild_id: u64, channel_id: u64) -> RaffleResult<String> {
        self.settings.fetch_or_create(guild_id).await?;
        let reply = match self.settings.add_channel(guild_id, channel_id).await? {
            ChannelAdd::AlreadyPresent => "The raffle already uses this channel.",
            ChannelAdd::Added => {
                tracing::info!(guild_id, channel_id, "raffle channel added");
                "The raffle now uses this channel."
            }
        };
        Ok(reply.into())
    }

    pub async fn remove_channel(&self, guild_id: u64, channel_id: Option<u64>) -> String {
        let Some(channel_id) = channel_id else {
            return "This command can only be performed in guild channels. If you don't want to receive raffle results personally, look at `/raffle_unmanage`".into();
        };
        Self::respond(guild_id, "remove_channel", self.try_remove_channel(guild_id, channel_id).await)
    }

    async fn try_remove_channel(&self, guild_id: u64, channel_id: u64) -> RaffleResult<String> {
        let reply = match self.settings.remove_channel(guild_id, channel_id).await? {
            ChannelRemoval::LastChannel => {
                "The raffle needs at least one channel to post results in.\nPlease add another channel with `/raffle_add` before removing this one."
            }
            ChannelRemoval::Removed => {
                tracing::info!(guild_id, channel_id, "raffle channel removed");
                "The raffle no longer uses this channel."
            }
            ChannelRemoval::NotPresent => "The raffle does not use this channel.",
        };
        Ok(reply.into())
    }

    pub async fn add_managers(&self, guild_id: u64, users: &[u64]) -> String {
        Self::respond(guild_id, "add_managers", self.try_add_managers(guild_id, users).await)
    }

    async fn try_add_managers(&self, guild_id: u64, users: &[u64]) -> RaffleResult<String> {
        self.settings.fetch_or_create(guild_id).await?;
        let lines: Vec<String> = self
            .settings
            .add_managers(guild_id, users)
            .await?
            .into_iter()
            .map(|change| match change {
                ManagerAdd::Added(u) => format!("{} now manages the raffle.", mention_user(u)),
                ManagerAdd::AlreadyManaging(u) => format!("{} is already managing the raffle.", mention_user(u)),
            })
            .collect();
        Ok(lines.join("\n"))
    }

    /// Also forgets the removed managers' status cards so the monitor stops
    /// editing them.
    pub async fn remove_managers(&self, guild_id: u64, users: &[u64]) -> String {
        Self::respond(guild_id, "remove_managers", self.try_remove_managers(guild_id, users).await)
    }

    async fn try_remove_managers(&self, guild_id: u64, users: &[u64]) -> RaffleResult<String> {
        let changes = self.settings.remove_managers(guild_id, users).await?;
        let mut tx = Transaction::new();
        let mut lines = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                ManagerRemoval::Removed(u) => {
                    tx = tx.hdel(Keys::new(guild_id).manager_messages(), u.to_string());
                    lines.push(format!("The raffle is no longer managed by {}", mention_user(u)));
                }
                ManagerRemoval::NotManaging(u) => {
                    lines.push(format!("{} is not managing the raffle.", mention_user(u)));
                }
            }
        }
        tx.exec(self.kv()).await?;
        Ok(lines.join("\n"))
    }
}
