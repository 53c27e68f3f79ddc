//! Entrants and winners: enter, draw, and the winner replies.

use super::machine::go_closed;
use super::{ids, Keys, Raffle, RaffleResult, Status, NO_RAFFLE};
use crate::kv::Transaction;
use crate::ui::cards;
use crate::utils::mention_user;

const NOT_DRAWN_HINT: &str = "Please make sure your name was mentioned on the raffle results.";

impl Raffle {
    pub async fn enter(&self, guild_id: u64, user_id: u64) -> String {
        Self::respond(guild_id, "enter", self.try_enter(guild_id, user_id).await)
    }

    async fn try_enter(&self, guild_id: u64, user_id: u64) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let user = user_id.to_string();
        let settings = loop {
            let r = Transaction::new()
                .get(k.state())
                .sismember(k.entries(), user.as_str())
                .sismember(k.pending(), user.as_str())
                .hexists(k.confirmed(), user.as_str())
                .hexists(k.issues(), user.as_str())
                .exec(self.kv())
                .await?;

            let stored = r.text(0)?;
            match Status::from_store(stored.as_deref()) {
                Status::InProgress => {}
                Status::Closed | Status::Finished => {
                    return Ok(format!("The raffle is not accepting entries at this time {}", mention_user(user_id)))
                }
                Status::Created => return Ok(NO_RAFFLE.into()),
            }
            if r.flag(1)? || r.flag(2)? || r.flag(3)? || r.flag(4)? {
                return Ok(format!("You have already entered the raffle {}", mention_user(user_id)));
            }

            let settings = self.require_settings(guild_id).await?;
            let added = Transaction::new()
                .require_eq(k.state(), stored)
                .sadd(k.entries(), [user.as_str()])
                .exec_checked(self.kv())
                .await?;
            match added {
                Some(r) if r.flag(0)? => break settings,
                Some(_) => return Ok(format!("You have already entered the raffle {}", mention_user(user_id))),
                None => Self::raced(guild_id, "enter"),
            }
        };
        tracing::debug!(guild_id, user_id, "raffle entry");

        self.broadcast_to_channels(&settings, &cards::entry_notice(user_id)).await;
        Ok("You have entered the raffle. Good luck!".into())
    }

    /// Draws `sum(groups)` winners. An in-progress raffle is closed in the
    /// same transaction.
    pub async fn draw(&self, guild_id: u64, groups: &[u32]) -> String {
        Self::respond(guild_id, "draw", self.try_draw(guild_id, groups).await)
    }

    async fn try_draw(&self, guild_id: u64, groups: &[u32]) -> RaffleResult<String> {
        const NOT_ENOUGH: &str = "There are not enough entries to draw the specified configuration.";
        let total: usize = groups.iter().map(|g| *g as usize).sum();
        let k = Keys::new(guild_id);
        let (status, settings, winners) = loop {
            let r = Transaction::new().get(k.state()).scard(k.entries()).exec(self.kv()).await?;
            let stored = r.text(0)?;
            let status = Status::from_store(stored.as_deref());
            if !status.is_active() {
                return Ok("There is no raffle running. Use `/raffle_start` to start a new raffle.".into());
            }
            let available = usize::try_from(r.int(1)?).unwrap_or(0);
            if total == 0 || total > available {
                return Ok(NOT_ENOUGH.into());
            }

            let settings = self.require_settings(guild_id).await?;
            // The close and the pop commit together, and only while the
            // entries still cover the whole draw.
            let mut tx = Transaction::new()
                .require_eq(k.state(), stored)
                .require_card_at_least(k.entries(), total);
            if status == Status::InProgress {
                tx = go_closed(tx, &k);
            }
            let deadline = (k.deadline_prefix(), self.config().confirm_window_secs);
            let pop_at = tx.len();
            let committed = tx
                .spop_into(k.entries(), k.pending(), total, Some(deadline))
                .exec_checked(self.kv())
                .await?;
            match committed {
                Some(r) => break (status, settings, ids(r.list(pop_at)?)),
                None => Self::raced(guild_id, "draw"),
            }
        };
        if winners.len() != total {
            tracing::error!(guild_id, drawn = winners.len(), total, "draw popped the wrong number of winners");
            return Ok(NOT_ENOUGH.into());
        }
        tracing::info!(guild_id, winners = winners.len(), "raffle drawn");

        if status == Status::InProgress {
            self.announce_close(&settings).await;
        }

        let instructions = cards::winner_instructions(self.config().confirm_window_secs);
        for &winner in &winners {
            if let Err(e) = self.messenger().send_direct_message(winner, &instructions).await {
                tracing::warn!(guild_id, winner, error = %format!("{e:#}"), "could not dm winner");
            }
        }
        self.broadcast_to_channels(&settings, &cards::draw_results(&winners, groups)).await;

        let mut names = Vec::with_capacity(winners.len());
        for &winner in &winners {
            names.push(self.messenger().display_name(guild_id, winner).await);
        }
        let card = cards::manager_card(&names, &[], &[]);
        for &manager in &settings.managers {
            if !self.messenger().is_user_online(guild_id, manager).await {
                continue;
            }
            let message_id = match self.messenger().send_direct_message(manager, &card).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(guild_id, manager, error = %format!("{e:#}"), "could not send manager card");
                    continue;
                }
            };
            // The draw is committed; an untracked card only misses its refreshes.
            if let Err(e) = Transaction::new()
                .hset(k.manager_messages(), manager.to_string(), message_id.to_string())
                .exec(self.kv())
                .await
            {
                tracing::warn!(guild_id, manager, error = %e, "could not track manager card");
            }
        }

        self.ensure_monitor(guild_id);
        Ok(format!("Drew {} winner(s).", winners.len()))
    }

    pub async fn confirm(&self, guild_id: u64, user_id: u64, battle_tag: &str) -> String {
        Self::respond(guild_id, "confirm", self.try_confirm(guild_id, user_id, battle_tag).await)
    }

    async fn try_confirm(&self, guild_id: u64, user_id: u64, battle_tag: &str) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let user = user_id.to_string();
        loop {
            let r = Transaction::new()
                .get(k.state())
                .sismember(k.pending(), user.as_str())
                .hexists(k.issues(), user.as_str())
                .exec(self.kv())
                .await?;
            let stored = r.text(0)?;
            if !Status::from_store(stored.as_deref()).is_active() {
                return Ok(NO_RAFFLE.into());
            }
            if !(r.flag(1)? || r.flag(2)?) {
                return Ok(format!("Only chosen players can confirm their battle tags.\n{NOT_DRAWN_HINT}"));
            }

            let committed = Transaction::new()
                .require_eq(k.state(), stored)
                .srem(k.pending(), [user.as_str()])
                .hdel(k.issues(), user.as_str())
                .hset(k.confirmed(), user.as_str(), battle_tag)
                .del(k.deadline(user_id))
                .exec_checked(self.kv())
                .await?;
            match committed {
                Some(_) => break,
                None => Self::raced(guild_id, "confirm"),
            }
        }
        tracing::debug!(guild_id, user_id, "winner confirmed");
        Ok("Confirmation complete, keep an eye on your friend requests.\n\nEnjoy the games!".into())
    }

    pub async fn issue(&self, guild_id: u64, user_id: u64, message: &str) -> String {
        Self::respond(guild_id, "issue", self.try_issue(guild_id, user_id, message).await)
    }

    async fn try_issue(&self, guild_id: u64, user_id: u64, message: &str) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let user = user_id.to_string();
        let settings = loop {
            let r = Transaction::new()
                .get(k.state())
                .sismember(k.pending(), user.as_str())
                .hexists(k.confirmed(), user.as_str())
                .exec(self.kv())
                .await?;
            let stored = r.text(0)?;
            if !Status::from_store(stored.as_deref()).is_active() {
                return Ok(NO_RAFFLE.into());
            }
            if !(r.flag(1)? || r.flag(2)?) {
                return Ok(format!("Only chosen players can use this command.\n{NOT_DRAWN_HINT}"));
            }

            let settings = self.require_settings(guild_id).await?;
            let committed = Transaction::new()
                .require_eq(k.state(), stored)
                .srem(k.pending(), [user.as_str()])
                .hdel(k.confirmed(), user.as_str())
                .hset(k.issues(), user.as_str(), message)
                .del(k.deadline(user_id))
                .exec_checked(self.kv())
                .await?;
            match committed {
                Some(_) => break settings,
                None => Self::raced(guild_id, "issue"),
            }
        };
        tracing::debug!(guild_id, user_id, "winner reported an issue");

        let name = self.messenger().display_name(guild_id, user_id).await;
        self.broadcast_to_managers(&settings, &cards::issue_notice(&name, message)).await;
        Ok("Issue has been sent. Expect a message from a manager soon.".into())
    }

    pub async fn withdraw(&self, guild_id: u64, user_id: u64) -> String {
        Self::respond(guild_id, "withdraw", self.try_withdraw(guild_id, user_id).await)
    }

    async fn try_withdraw(&self, guild_id: u64, user_id: u64) -> RaffleResult<String> {
        let k = Keys::new(guild_id);
        let user = user_id.to_string();
        loop {
            let r = Transaction::new()
                .get(k.state())
                .sismember(k.pending(), user.as_str())
                .hexists(k.issues(), user.as_str())
                .hexists(k.confirmed(), user.as_str())
                .exec(self.kv())
                .await?;
            let stored = r.text(0)?;
            if !Status::from_store(stored.as_deref()).is_active() {
                return Ok(NO_RAFFLE.into());
            }
            if !(r.flag(1)? || r.flag(2)? || r.flag(3)?) {
                return Ok(format!("Only chosen players can withdraw from the raffle.\n{NOT_DRAWN_HINT}"));
            }

            let committed = Transaction::new()
                .require_eq(k.state(), stored)
                .srem(k.pending(), [user.as_str()])
                .hdel(k.issues(), user.as_str())
                .hdel(k.confirmed(), user.as_str())
                .del(k.deadline(user_id))
                .exec_checked(self.kv())
                .await?;
            match committed {
                Some(_) => break,
                None => Self::raced(guild_id, "withdraw"),
            }
        }
        tracing::debug!(guild_id, user_id, "winner withdrew");
        Ok("You have withdrawn from the raffle. Join us again next time!".into())
    }

    /// Withdraws a winner whose confirmation deadline lapsed. Does nothing if
    /// they replied in the meantime. Returns whether they were withdrawn.
    pub async fn expire_pending(&self, guild_id: u64, user_id: u64) -> bool {
        let k = Keys::new(guild_id);
        let removed = Transaction::new()
            .srem(k.pending(), [user_id.to_string()])
            .del(k.deadline(user_id))
            .exec(self.kv())
            .await
            .and_then(|r| r.flag(0));
        match removed {
            Ok(true) => {
                tracing::info!(guild_id, user_id, "winner withdrawn after confirmation window");
                let notice = "You have automatically withdrawn from the raffle due to inactivity.";
                if let Err(e) = self.messenger().send_direct_message(user_id, notice).await {
                    tracing::warn!(guild_id, user_id, error = %format!("{e:#}"), "could not dm withdrawn winner");
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(guild_id, user_id, error = %e, "auto-withdraw failed");
                false
            }
        }
    }
}
