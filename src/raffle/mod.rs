//! Raffle core: state machine, entry/draw bookkeeping and the per-guild
//! monitor. Public operations never fail; they answer with the text to show
//! the user and log anything that went wrong underneath.

mod channels;
mod entries;
pub mod keys;
mod machine;
pub mod monitor;
pub mod status;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::RaffleConfig;
use crate::db::{RaffleSettings, SettingsStore};
use crate::kv::{KvStore, StoreError, Transaction};
use crate::messaging::Messenger;

pub use keys::Keys;
pub use monitor::{Monitor, MonitorExit};
pub use status::Status;

pub const TRY_AGAIN: &str = "Something went wrong, please try again.";
pub const NO_RAFFLE: &str = "There is no raffle running right now.";

#[derive(Debug, thiserror::Error)]
pub enum RaffleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("settings store: {0:#}")]
    Settings(#[from] anyhow::Error),
    #[error("guild {0} has raffle state but no raffle settings")]
    MissingSettings(u64),
}

pub type RaffleResult<T> = Result<T, RaffleError>;

/// Where a command came from: the issuing user and, outside DMs, the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub user: u64,
    pub channel: Option<u64>,
}

/// Everything the store holds about one guild's raffle, read in one go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub status: Option<Status>,
    pub entries: HashSet<u64>,
    pub pending: HashSet<u64>,
    pub confirmed: HashMap<u64, String>,
    pub issues: HashMap<u64, String>,
    pub timeout_ttl: i64,
}

impl Snapshot {
    pub fn status(&self) -> Status {
        self.status.unwrap_or(Status::Created)
    }

    pub fn is_drawn(&self, user: u64) -> bool {
        self.pending.contains(&user) || self.confirmed.contains_key(&user) || self.issues.contains_key(&user)
    }
}

pub(crate) fn ids(members: Vec<String>) -> Vec<u64> {
    members.iter().filter_map(|m| m.parse().ok()).collect()
}

pub(crate) fn id_map(map: HashMap<String, String>) -> HashMap<u64, String> {
    map.into_iter().filter_map(|(k, v)| k.parse().ok().map(|id| (id, v))).collect()
}

/// A guild's local monitor task. `rearm` asks a task that is winding down
/// to run one more monitor instead of exiting.
struct MonitorSlot {
    handle: JoinHandle<()>,
    rearm: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct Raffle {
    kv: Arc<dyn KvStore>,
    settings: Arc<dyn SettingsStore>,
    messenger: Arc<dyn Messenger>,
    config: RaffleConfig,
    monitors: Arc<DashMap<u64, MonitorSlot>>,
}

impl Raffle {
    pub fn new(
        kv: Arc<dyn KvStore>,
        settings: Arc<dyn SettingsStore>,
        messenger: Arc<dyn Messenger>,
        config: RaffleConfig,
    ) -> Self {
        Self { kv, settings, messenger, config, monitors: Arc::new(DashMap::new()) }
    }

    pub fn config(&self) -> &RaffleConfig {
        &self.config
    }

    pub(crate) fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    pub(crate) fn messenger(&self) -> &dyn Messenger {
        self.messenger.as_ref()
    }

    /// The status plus the stored value it was read from, which the write
    /// that follows requires to be unchanged.
    pub(crate) async fn status(&self, guild_id: u64) -> RaffleResult<(Status, Option<String>)> {
        let r = Transaction::new().get(Keys::new(guild_id).state()).exec(self.kv()).await?;
        let stored = r.text(0)?;
        Ok((Status::from_store(stored.as_deref()), stored))
    }

    /// A checked write lost to a concurrent one; the operation starts over.
    pub(crate) fn raced(guild_id: u64, op: &'static str) {
        tracing::debug!(guild_id, op, "raffle state changed underneath, retrying");
    }

    pub async fn snapshot(&self, guild_id: u64) -> RaffleResult<Snapshot> {
        let k = Keys::new(guild_id);
        let r = Transaction::new()
            .get(k.state())
            .smembers(k.entries())
            .smembers(k.pending())
            .hgetall(k.confirmed())
            .hgetall(k.issues())
            .ttl(k.timeout())
            .exec(self.kv())
            .await?;
        Ok(Snapshot {
            status: r.text(0)?.as_deref().map(|s| Status::from_store(Some(s))),
            entries: ids(r.list(1)?).into_iter().collect(),
            pending: ids(r.list(2)?).into_iter().collect(),
            confirmed: id_map(r.map(3)?),
            issues: id_map(r.map(4)?),
            timeout_ttl: r.int(5)?,
        })
    }

    /// Whether the user is a drawn winner (pending, confirmed or with an issue).
    pub async fn is_drawn(&self, guild_id: u64, user_id: u64) -> bool {
        match self.snapshot(guild_id).await {
            Ok(s) => s.status().is_active() && s.is_drawn(user_id),
            Err(e) => {
                tracing::warn!(guild_id, error = %e, "raffle lookup failed");
                false
            }
        }
    }

    /// Settings that must exist once a raffle has left `Created`.
    pub(crate) async fn require_settings(&self, guild_id: u64) -> RaffleResult<RaffleSettings> {
        self.settings
            .fetch(guild_id)
            .await?
            .and_then(|g| g.raffle)
            .ok_or(RaffleError::MissingSettings(guild_id))
    }

    pub(crate) async fn broadcast_to_channels(&self, settings: &RaffleSettings, content: &str) {
        for &channel in &settings.channels {
            if let Err(e) = self.messenger.send_channel_message(channel, content).await {
                tracing::warn!(channel, error = %format!("{e:#}"), "raffle broadcast to channel failed");
            }
        }
    }

    pub(crate) async fn broadcast_to_managers(&self, settings: &RaffleSettings, content: &str) {
        for &manager in &settings.managers {
            if let Err(e) = self.messenger.send_direct_message(manager, content).await {
                tracing::warn!(manager, error = %format!("{e:#}"), "raffle dm to manager failed");
            }
        }
    }

    /// Converts an internal failure into the generic retry message.
    pub(crate) fn respond(guild_id: u64, op: &'static str, result: RaffleResult<String>) -> String {
        match result {
            Ok(reply) => reply,
            Err(RaffleError::MissingSettings(_)) => {
                tracing::error!(guild_id, op, "raffle state exists without raffle settings");
                TRY_AGAIN.to_string()
            }
            Err(e) => {
                tracing::error!(guild_id, op, error = %e, "raffle operation failed");
                TRY_AGAIN.to_string()
            }
        }
    }

    /// Starts a local monitor task for the guild unless one is still running.
    /// Other processes are kept out by the store lock, not by this registry.
    pub fn ensure_monitor(&self, guild_id: u64) {
        if !self.config.auto_monitor {
            return;
        }
        match self.monitors.entry(guild_id) {
            Entry::Occupied(e) if !e.get().handle.is_finished() => {
                // It may already have seen the raffle inactive and be on its way out.
                e.get().rearm.store(true, Ordering::SeqCst);
            }
            Entry::Occupied(mut e) => {
                e.insert(self.spawn_monitor(guild_id));
            }
            Entry::Vacant(e) => {
                e.insert(self.spawn_monitor(guild_id));
            }
        }
    }

    fn spawn_monitor(&self, guild_id: u64) -> MonitorSlot {
        let raffle = self.clone();
        let rearm = Arc::new(AtomicBool::new(false));
        let flag = rearm.clone();
        let handle = tokio::spawn(async move {
            loop {
                let exit = Monitor::new(raffle.clone(), guild_id).run().await;
                tracing::debug!(guild_id, ?exit, "raffle monitor stopped");
                // Leaving the registry and reading the flag happen under the
                // same shard lock `ensure_monitor` takes, so no request is lost.
                let left = raffle
                    .monitors
                    .remove_if(&guild_id, |_, slot| Arc::ptr_eq(&slot.rearm, &flag) && !flag.load(Ordering::SeqCst))
                    .is_some();
                if left || !flag.swap(false, Ordering::SeqCst) {
                    break;
                }
                tracing::debug!(guild_id, "raffle monitor rearmed");
            }
        });
        MonitorSlot { handle, rearm }
    }
}
