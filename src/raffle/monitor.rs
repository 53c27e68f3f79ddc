//! Per-guild refresh loop. One live loop per guild across all processes,
//! held by a session id in `Raffle:{guild}:lock` that is renewed every tick.

use std::collections::HashMap;

use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::{id_map, ids, Keys, Raffle, Status};
use crate::kv::{StoreError, Transaction};
use crate::ui::cards;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Another session already holds the lock.
    NotAcquired,
    /// The lock expired or was taken over between ticks.
    LockLost,
    /// The raffle is no longer in progress or closed.
    Inactive,
}

pub struct Monitor {
    raffle: Raffle,
    guild_id: u64,
    session: String,
}

impl Monitor {
    pub fn new(raffle: Raffle, guild_id: u64) -> Self {
        Self { raffle, guild_id, session: Uuid::new_v4().to_string() }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn acquire(&self) -> Result<bool, StoreError> {
        let ttl = self.raffle.config().lock_ttl_secs;
        Transaction::new()
            .set_nx_ex(Keys::new(self.guild_id).lock(), self.session.as_str(), ttl)
            .exec(self.raffle.kv())
            .await?
            .flag(0)
    }

    pub async fn run(self) -> MonitorExit {
        let guild_id = self.guild_id;
        match self.acquire().await {
            Ok(true) => tracing::info!(guild_id, session = %self.session, "raffle monitor started"),
            Ok(false) => return MonitorExit::NotAcquired,
            Err(e) => {
                tracing::warn!(guild_id, error = %e, "could not take raffle monitor lock");
                return MonitorExit::NotAcquired;
            }
        }

        let mut interval = tokio::time::interval(self.raffle.config().monitor_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(None) => {}
                Ok(Some(exit)) => return exit,
                Err(e) => tracing::warn!(guild_id, error = %e, "raffle monitor tick failed"),
            }
        }
    }

    /// One iteration. `Some` means the loop should stop.
    pub async fn tick(&self) -> Result<Option<MonitorExit>, StoreError> {
        let guild_id = self.guild_id;
        let k = Keys::new(guild_id);
        let r = Transaction::new()
            .get(k.state())
            .hgetall(k.channel_messages())
            .hgetall(k.manager_messages())
            .scard(k.entries())
            .ttl(k.timeout())
            .get(k.next())
            .smembers(k.pending())
            .hgetall(k.confirmed())
            .hgetall(k.issues())
            .expire_if_eq(k.lock(), self.session.as_str(), self.raffle.config().lock_ttl_secs)
            .exec(self.raffle.kv())
            .await?;

        if !r.flag(9)? {
            tracing::info!(guild_id, "raffle monitor lost its lock");
            return Ok(Some(MonitorExit::LockLost));
        }

        let status = Status::from_store(r.text(0)?.as_deref());
        if !status.is_active() {
            Transaction::new().del_if_eq(k.lock(), self.session.as_str()).exec(self.raffle.kv()).await?;
            return Ok(Some(MonitorExit::Inactive));
        }

        let timeout_ttl = r.int(4)?;
        let pending = ids(r.list(6)?);
        self.refresh_channels(status, id_map(r.map(1)?), r.int(3)?, timeout_ttl).await;
        self.refresh_managers(id_map(r.map(2)?), &pending, id_map(r.map(7)?), id_map(r.map(8)?))
            .await;

        if status == Status::InProgress && timeout_ttl <= -2 {
            match r.text(5)?.as_deref().and_then(Status::parse) {
                Some(Status::Closed) => {
                    tracing::info!(guild_id, "raffle timer ran out, closing");
                    let reply = self.raffle.close(guild_id).await;
                    tracing::debug!(guild_id, reply = %reply, "timed close");
                }
                next => tracing::debug!(guild_id, ?next, "timer ran out without a next state"),
            }
        }

        self.expire_lapsed(&k, &pending).await?;
        Ok(None)
    }

    async fn refresh_channels(&self, status: Status, cards_by_channel: HashMap<u64, String>, entries: i64, ttl: i64) {
        let card = cards::channel_card(status, entries, ttl);
        for (channel, message) in cards_by_channel {
            let Ok(message) = message.parse::<u64>() else { continue };
            if let Err(e) = self.raffle.messenger().edit_channel_message(channel, message, &card).await {
                tracing::warn!(guild_id = self.guild_id, channel, error = %format!("{e:#}"), "status card edit failed");
            }
        }
    }

    async fn refresh_managers(
        &self,
        cards_by_manager: HashMap<u64, String>,
        pending: &[u64],
        confirmed: HashMap<u64, String>,
        issues: HashMap<u64, String>,
    ) {
        if cards_by_manager.is_empty() {
            return;
        }
        let messenger = self.raffle.messenger();
        let mut pending_names = Vec::with_capacity(pending.len());
        for &user in pending {
            pending_names.push(messenger.display_name(self.guild_id, user).await);
        }
        let mut confirmed_lines = Vec::with_capacity(confirmed.len());
        for (user, tag) in confirmed {
            confirmed_lines.push((messenger.display_name(self.guild_id, user).await, tag));
        }
        let mut issue_lines = Vec::with_capacity(issues.len());
        for (user, text) in issues {
            issue_lines.push((messenger.display_name(self.guild_id, user).await, text));
        }
        pending_names.sort();
        confirmed_lines.sort();
        issue_lines.sort();

        let card = cards::manager_card(&pending_names, &confirmed_lines, &issue_lines);
        for (manager, message) in cards_by_manager {
            let Ok(message) = message.parse::<u64>() else { continue };
            if let Err(e) = messenger.edit_direct_message(manager, message, &card).await {
                tracing::warn!(guild_id = self.guild_id, manager, error = %format!("{e:#}"), "manager card edit failed");
            }
        }
    }

    /// Withdraws pending winners whose deadline key has expired.
    async fn expire_lapsed(&self, k: &Keys, pending: &[u64]) -> Result<(), StoreError> {
        if pending.is_empty() {
            return Ok(());
        }
        let mut tx = Transaction::new();
        for &user in pending {
            tx = tx.ttl(k.deadline(user));
        }
        let r = tx.exec(self.raffle.kv()).await?;
        for (i, &user) in pending.iter().enumerate() {
            if r.int(i)? <= -2 {
                self.raffle.expire_pending(self.guild_id, user).await;
            }
        }
        Ok(())
    }
}
