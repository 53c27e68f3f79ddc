//! Status transitions: start, open, close, finish and the status card.

use super::{Keys, Origin, Raffle, RaffleResult, Status};
use crate::db::RaffleSettings;
use crate::kv::Transaction;
use crate::ui::cards;

/// Sets the raffle in progress and arms (or disarms) the close timer.
fn go_in_progress(tx: Transaction, k: &Keys, duration_minutes: Option<u64>) -> Transaction {
    let tx = tx.set(k.state(), Status::InProgress.as_str());
    match duration_minutes.filter(|m| *m > 0) {
        Some(minutes) => tx
            .set_ex(k.timeout(), "True", minutes * 60)
            .set(k.next(), Status::Closed.as_str()),
        None => tx.set(k.timeout(), "True").del(k.next()),
    }
}

/// Ops that move an in-progress raffle to closed.
pub(super) fn go_closed(tx: Transaction, k: &Keys) -> Transaction {
    tx.set(k.state(), Status::Closed.as_str()).del(k.timeout()).del(k.next())
}

impl Raffle {
    pub async fn start(&self, guild_id: u64, origin: Origin, duration_minutes: Option<u64>) -> String {
        Self::respond(guild_id, "start", self.try_start(guild_id, origin, duration_minutes).await)
    }

    async fn try_start(&self, guild_id: u64, origin: Origin, duration_minutes: Option<u64>) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let settings = loop {
            let (status, stored) = self.status(guild_id).await?;
            match status {
                Status::Created | Status::Finished => {}
                Status::InProgress => return Ok("The raffle is already in progress.".into()),
                Status::Closed => {
                    return Ok("A closed raffle cannot be started. If you'd like to extend the raffle, use `/raffle_open` instead.".into())
                }
            }

            let guild = self.settings.fetch_or_create(guild_id).await?;
            let settings = match guild.raffle {
                Some(settings) => settings,
                None => {
                    let settings = RaffleSettings {
                        channels: origin.channel.into_iter().collect(),
                        managers: vec![origin.user],
                    };
                    self.settings.set_raffle_settings(guild_id, &settings).await?;
                    tracing::info!(guild_id, "created default raffle settings");
                    settings
                }
            };
            if settings.channels.is_empty() {
                return Ok("Please add at least one channel from the guild for the raffle to use by going to the channel and using `/raffle_add`".into());
            }
            if settings.managers.is_empty() {
                return Ok("Please add at least one manager for the raffle to send issues to by using `/raffle_manage`".into());
            }

            let tx = Transaction::new().require_eq(k.state(), stored);
            match go_in_progress(tx, &k, duration_minutes).exec_checked(self.kv()).await? {
                Some(_) => break settings,
                None => Self::raced(guild_id, "start"),
            }
        };
        tracing::info!(guild_id, ?duration_minutes, "raffle started");

        self.broadcast_to_channels(&settings, "The raffle has started!\nPlease use `/enter` to participate.")
            .await;
        self.broadcast_to_managers(&settings, "A raffle you manage has started!").await;
        self.ensure_monitor(guild_id);
        Ok("The raffle has started.".into())
    }

    pub async fn open(&self, guild_id: u64, duration_minutes: Option<u64>) -> String {
        Self::respond(guild_id, "open", self.try_open(guild_id, duration_minutes).await)
    }

    async fn try_open(&self, guild_id: u64, duration_minutes: Option<u64>) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let settings = loop {
            let (status, stored) = self.status(guild_id).await?;
            match status {
                Status::Closed => {}
                Status::InProgress => return Ok("The raffle is already open.".into()),
                Status::Finished => {
                    return Ok("The raffle has finished. Please use `/raffle_start` instead to restart the raffle.".into())
                }
                Status::Created => return Ok("Only closed raffles can be opened.".into()),
            }

            let settings = self.require_settings(guild_id).await?;
            let tx = Transaction::new().require_eq(k.state(), stored);
            match go_in_progress(tx, &k, duration_minutes).exec_checked(self.kv()).await? {
                Some(_) => break settings,
                None => Self::raced(guild_id, "open"),
            }
        };
        tracing::info!(guild_id, ?duration_minutes, "raffle reopened");

        self.broadcast_to_channels(&settings, "The raffle is open again. Use `/enter` to enter.").await;
        self.broadcast_to_managers(&settings, "A raffle you manage has reopened.").await;
        self.ensure_monitor(guild_id);
        Ok("The raffle is open again.".into())
    }

    pub async fn close(&self, guild_id: u64) -> String {
        Self::respond(guild_id, "close", self.try_close(guild_id).await)
    }

    async fn try_close(&self, guild_id: u64) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let settings = loop {
            let (status, stored) = self.status(guild_id).await?;
            match status {
                Status::InProgress => {}
                Status::Created => return Ok("A raffle that has not started, cannot be closed.".into()),
                Status::Closed => return Ok("The raffle is already closed.".into()),
                Status::Finished => return Ok("A raffle that is not running, cannot be closed.".into()),
            }

            let settings = self.require_settings(guild_id).await?;
            let tx = Transaction::new().require_eq(k.state(), stored);
            match go_closed(tx, &k).exec_checked(self.kv()).await? {
                Some(_) => break settings,
                None => Self::raced(guild_id, "close"),
            }
        };
        tracing::info!(guild_id, "raffle closed");
        self.announce_close(&settings).await;
        Ok("The raffle has been closed.".into())
    }

    pub(super) async fn announce_close(&self, settings: &RaffleSettings) {
        self.broadcast_to_channels(settings, "The raffle is now closed.").await;
        self.broadcast_to_managers(settings, "A raffle you manage has closed.").await;
    }

    pub async fn finish(&self, guild_id: u64) -> String {
        Self::respond(guild_id, "finish", self.try_finish(guild_id).await)
    }

    async fn try_finish(&self, guild_id: u64) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let settings = loop {
            let snapshot = self.snapshot(guild_id).await?;
            let status = snapshot.status();
            if !status.is_active() {
                return Ok("The raffle is already finished.".into());
            }

            let settings = self.require_settings(guild_id).await?;
            // A draw in between would shrink the entries and leave deadlines
            // this batch does not know about.
            let mut tx = Transaction::new()
                .require_eq(k.state(), Some(status.as_str().to_string()))
                .require_card_at_least(k.entries(), snapshot.entries.len());
            for key in k.run_time() {
                tx = tx.del(key);
            }
            let drawn = snapshot
                .pending
                .iter()
                .chain(snapshot.confirmed.keys())
                .chain(snapshot.issues.keys());
            for user in drawn {
                tx = tx.del(k.deadline(*user));
            }
            match tx.exec_checked(self.kv()).await? {
                Some(_) => break settings,
                None => Self::raced(guild_id, "finish"),
            }
        };
        tracing::info!(guild_id, "raffle finished");

        self.broadcast_to_channels(&settings, "The raffle is finished.").await;
        self.broadcast_to_managers(&settings, "A raffle you manage has finished.").await;
        Ok("The raffle has finished.".into())
    }

    /// Posts a fresh status card in `channel_id`, replacing the one posted
    /// there before, and keeps it refreshed through the monitor.
    pub async fn info(&self, guild_id: u64, channel_id: u64) -> String {
        Self::respond(guild_id, "info", self.try_info(guild_id, channel_id).await)
    }

    async fn try_info(&self, guild_id: u64, channel_id: u64) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let r = Transaction::new()
            .get(k.state())
            .scard(k.entries())
            .ttl(k.timeout())
            .hget(k.channel_messages(), channel_id.to_string())
            .exec(self.kv())
            .await?;
        let status = Status::from_store(r.text(0)?.as_deref());
        if !status.is_active() {
            return Ok("There's no raffle running at this moment.".into());
        }

        if let Some(previous) = r.text(3)?.and_then(|id| id.parse::<u64>().ok()) {
            if let Err(e) = self.messenger().delete_channel_message(channel_id, previous).await {
                tracing::debug!(guild_id, channel_id, error = %format!("{e:#}"), "old status card already gone");
            }
        }

        let card = cards::channel_card(status, r.int(1)?, r.int(2)?);
        let message_id = match self.messenger().send_channel_message(channel_id, &card).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(guild_id, channel_id, error = %format!("{e:#}"), "could not post status card");
                return Ok("Could not post the status card in this channel.".into());
            }
        };
        Transaction::new()
            .hset(k.channel_messages(), channel_id.to_string(), message_id.to_string())
            .exec(self.kv())
            .await?;

        self.ensure_monitor(guild_id);
        Ok("Status card posted.".into())
    }
}
