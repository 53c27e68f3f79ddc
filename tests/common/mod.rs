#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use raffle_bot::config::RaffleConfig;
use raffle_bot::db::{MemorySettingsStore, RaffleSettings, SettingsStore};
use raffle_bot::kv::{Check, KvStore, MemoryStore, Op, Reply, StoreError};
use raffle_bot::messaging::Messenger;
use raffle_bot::raffle::{Origin, Raffle};

pub const GUILD: u64 = 100;
pub const CHANNEL: u64 = 200;
pub const MANAGER: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Channel { channel: u64, id: u64, content: String },
    ChannelEdit { channel: u64, id: u64, content: String },
    ChannelDelete { channel: u64, id: u64 },
    Direct { user: u64, id: u64, content: String },
    DirectEdit { user: u64, id: u64, content: String },
}

/// Messenger that records everything instead of talking to a chat service.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    online: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

impl RecordingMessenger {
    pub fn set_online(&self, user: u64) {
        self.online.lock().unwrap().insert(user);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn dms_to(&self, user: u64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Direct { user: u, content, .. } if u == user => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn channel_posts(&self, channel: u64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Channel { channel: c, content, .. } if c == channel => Some(content),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_channel_message(&self, channel: u64, content: &str) -> anyhow::Result<u64> {
        let id = self.id();
        self.record(Sent::Channel { channel, id, content: content.to_string() });
        Ok(id)
    }

    async fn edit_channel_message(&self, channel: u64, id: u64, content: &str) -> anyhow::Result<()> {
        self.record(Sent::ChannelEdit { channel, id, content: content.to_string() });
        Ok(())
    }

    async fn delete_channel_message(&self, channel: u64, id: u64) -> anyhow::Result<()> {
        self.record(Sent::ChannelDelete { channel, id });
        Ok(())
    }

    async fn send_direct_message(&self, user: u64, content: &str) -> anyhow::Result<u64> {
        let id = self.id();
        self.record(Sent::Direct { user, id, content: content.to_string() });
        Ok(id)
    }

    async fn edit_direct_message(&self, user: u64, id: u64, content: &str) -> anyhow::Result<()> {
        self.record(Sent::DirectEdit { user, id, content: content.to_string() });
        Ok(())
    }

    async fn is_user_online(&self, _guild: u64, user: u64) -> bool {
        self.online.lock().unwrap().contains(&user)
    }

    async fn display_name(&self, _guild: u64, user: u64) -> String {
        format!("player{user}")
    }
}

/// Wraps the memory store to make races and outages reproducible: every
/// batch first yields to other tasks, and batches with an op matching the
/// armed pattern fail like a dropped connection.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_on: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner, fail_on: Mutex::new(None) }
    }

    /// Fails any batch containing an op whose debug form contains `pattern`,
    /// for example `"SAdd("` or `"manager_messages"`.
    pub fn fail_on(&self, pattern: &str) {
        *self.fail_on.lock().unwrap() = Some(pattern.to_string());
    }

    pub fn heal(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    async fn gate(&self, ops: &[Op]) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let pattern = self.fail_on.lock().unwrap().clone();
        match pattern {
            Some(p) if ops.iter().any(|op| format!("{op:?}").contains(&p)) => Err(StoreError::Unavailable(
                redis::RedisError::from((redis::ErrorKind::IoError, "connection reset")),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn exec(&self, ops: Vec<Op>) -> Result<Vec<Reply>, StoreError> {
        self.gate(&ops).await?;
        self.inner.exec(ops).await
    }

    async fn exec_checked(&self, checks: Vec<Check>, ops: Vec<Op>) -> Result<Option<Vec<Reply>>, StoreError> {
        self.gate(&ops).await?;
        self.inner.exec_checked(checks, ops).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

pub struct Harness {
    pub raffle: Raffle,
    pub kv: Arc<MemoryStore>,
    pub settings: Arc<MemorySettingsStore>,
    pub messenger: Arc<RecordingMessenger>,
}

impl Harness {
    pub fn new() -> Self {
        let kv = Arc::new(MemoryStore::new());
        Self::build(kv.clone(), kv, false)
    }

    /// The raffle talks to the store through a [`FlakyStore`]; `kv` stays
    /// the plain store underneath for assertions.
    pub fn flaky(auto_monitor: bool) -> (Self, Arc<FlakyStore>) {
        let kv = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(kv.clone()));
        (Self::build(kv, flaky.clone(), auto_monitor), flaky)
    }

    fn build(kv: Arc<MemoryStore>, store: Arc<dyn KvStore>, auto_monitor: bool) -> Self {
        let settings = Arc::new(MemorySettingsStore::new());
        let messenger = Arc::new(RecordingMessenger::default());
        let config = RaffleConfig { auto_monitor, ..RaffleConfig::default() };
        let raffle = Raffle::new(store, settings.clone(), messenger.clone(), config);
        Self { raffle, kv, settings, messenger }
    }

    pub fn origin() -> Origin {
        Origin { user: MANAGER, channel: Some(CHANNEL) }
    }

    /// A raffle in progress with the default channel and manager.
    pub async fn started() -> Self {
        let h = Self::new();
        h.raffle.start(GUILD, Self::origin(), None).await;
        h
    }

    pub async fn with_entries(users: impl IntoIterator<Item = u64>) -> Self {
        let h = Self::started().await;
        for user in users {
            h.raffle.enter(GUILD, user).await;
        }
        h
    }

    pub async fn settings(&self) -> Option<RaffleSettings> {
        self.settings.fetch(GUILD).await.unwrap().and_then(|g| g.raffle)
    }
}
