use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use tokio::time::Instant;

use super::{Check, KvStore, Op, Reply, StoreError};

#[derive(Debug, Clone)]
enum Data {
    Str(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

/// In-process store with Redis semantics for the ops the bot issues.
/// Expiry follows `tokio::time`, so paused-clock tests can drive TTLs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, for assertions in tests.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<String> = keys
            .iter()
            .filter(|(_, e)| e.expires_at.map_or(true, |at| at > now))
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }
}

struct Keyspace<'a> {
    keys: &'a mut HashMap<String, Entry>,
    now: Instant,
}

impl Keyspace<'_> {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = matches!(self.keys.get(key), Some(e) if e.expires_at.map_or(false, |at| at <= self.now));
        if expired {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }

    fn string(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live(key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut HashSet<String>, StoreError> {
        if self.live(key).is_none() {
            self.keys.insert(
                key.to_string(),
                Entry { data: Data::Set(HashSet::new()), expires_at: None },
            );
        }
        match self.keys.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Set(s)) => Ok(s),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_ref(&mut self, key: &str) -> Result<Option<&HashSet<String>>, StoreError> {
        match self.live(key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::Set(s)) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        if self.live(key).is_none() {
            self.keys.insert(
                key.to_string(),
                Entry { data: Data::Hash(HashMap::new()), expires_at: None },
            );
        }
        match self.keys.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Hash(h)) => Ok(h),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash_ref(&mut self, key: &str) -> Result<Option<&HashMap<String, String>>, StoreError> {
        match self.live(key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn put_string(&mut self, key: &str, value: &str, ttl: Option<u64>) {
        let expires_at = ttl.map(|secs| self.now + Duration::from_secs(secs));
        self.keys.insert(
            key.to_string(),
            Entry { data: Data::Str(value.to_string()), expires_at },
        );
    }

    /// Drops collections that became empty, as Redis does.
    fn prune(&mut self, key: &str) {
        let empty = match self.keys.get(key).map(|e| &e.data) {
            Some(Data::Set(s)) => s.is_empty(),
            Some(Data::Hash(h)) => h.is_empty(),
            _ => false,
        };
        if empty {
            self.keys.remove(key);
        }
    }

    fn del(&mut self, key: &str) -> i64 {
        let existed = self.live(key).is_some();
        self.keys.remove(key);
        i64::from(existed)
    }

    fn holds(&mut self, check: &Check) -> Result<bool, StoreError> {
        Ok(match check {
            Check::Equals(k, expected) => self.string(k)? == *expected,
            Check::CardAtLeast(k, count) => self.set_ref(k)?.map_or(0, |s| s.len()) >= *count,
        })
    }

    fn apply(&mut self, op: &Op) -> Result<Reply, StoreError> {
        let reply = match op {
            Op::Get(k) => self.string(k)?.map_or(Reply::Nil, Reply::Text),
            Op::Set(k, v) => {
                self.put_string(k, v, None);
                Reply::Okay
            }
            Op::SetEx(k, v, secs) => {
                self.put_string(k, v, Some(*secs));
                Reply::Okay
            }
            Op::SetNxEx(k, v, secs) => {
                if self.live(k).is_some() {
                    Reply::Int(0)
                } else {
                    self.put_string(k, v, Some(*secs));
                    Reply::Int(1)
                }
            }
            Op::Del(k) => Reply::Int(self.del(k)),
            Op::Expire(k, secs) => {
                let at = self.now + Duration::from_secs(*secs);
                match self.live(k) {
                    Some(e) => {
                        e.expires_at = Some(at);
                        Reply::Int(1)
                    }
                    None => Reply::Int(0),
                }
            }
            Op::Ttl(k) => {
                let now = self.now;
                match self.live(k) {
                    None => Reply::Int(-2),
                    Some(Entry { expires_at: None, .. }) => Reply::Int(-1),
                    Some(Entry { expires_at: Some(at), .. }) => {
                        // Redis rounds the remaining time to the nearest second.
                        let millis = at.saturating_duration_since(now).as_millis() as i64;
                        Reply::Int((millis + 500) / 1000)
                    }
                }
            }
            Op::SAdd(k, members) => {
                if members.is_empty() {
                    return Ok(Reply::Int(0));
                }
                let set = self.set_mut(k)?;
                let added = members.iter().filter(|m| set.insert((*m).clone())).count();
                Reply::Int(added as i64)
            }
            Op::SRem(k, members) => {
                let removed = if self.set_ref(k)?.is_some() {
                    let set = self.set_mut(k)?;
                    members.iter().filter(|m| set.remove(*m)).count()
                } else {
                    0
                };
                self.prune(k);
                Reply::Int(removed as i64)
            }
            Op::SCard(k) => Reply::Int(self.set_ref(k)?.map_or(0, |s| s.len() as i64)),
            Op::SIsMember(k, m) => {
                Reply::Int(i64::from(self.set_ref(k)?.map_or(false, |s| s.contains(m))))
            }
            Op::SMembers(k) => {
                let mut members: Vec<String> =
                    self.set_ref(k)?.map(|s| s.iter().cloned().collect()).unwrap_or_default();
                members.sort();
                Reply::List(members)
            }
            Op::SPopInto { from, to, count, mark } => {
                let popped: Vec<String> = match self.set_ref(from)? {
                    Some(set) if set.len() >= *count => {
                        let mut rng = rand::thread_rng();
                        set.iter().cloned().choose_multiple(&mut rng, *count)
                    }
                    _ => Vec::new(),
                };
                if !popped.is_empty() {
                    let source = self.set_mut(from)?;
                    for member in &popped {
                        source.remove(member);
                    }
                    self.prune(from);
                    let target = self.set_mut(to)?;
                    target.extend(popped.iter().cloned());
                    if let Some((prefix, ttl)) = mark {
                        for member in &popped {
                            self.put_string(&format!("{prefix}{member}"), "1", Some(*ttl));
                        }
                    }
                }
                Reply::List(popped)
            }
            Op::HSet(k, f, v) => {
                let hash = self.hash_mut(k)?;
                let fresh = hash.insert(f.clone(), v.clone()).is_none();
                Reply::Int(i64::from(fresh))
            }
            Op::HGet(k, f) => self
                .hash_ref(k)?
                .and_then(|h| h.get(f).cloned())
                .map_or(Reply::Nil, Reply::Text),
            Op::HDel(k, fields) => {
                let removed = if self.hash_ref(k)?.is_some() {
                    let hash = self.hash_mut(k)?;
                    fields.iter().filter(|f| hash.remove(*f).is_some()).count()
                } else {
                    0
                };
                self.prune(k);
                Reply::Int(removed as i64)
            }
            Op::HExists(k, f) => {
                Reply::Int(i64::from(self.hash_ref(k)?.map_or(false, |h| h.contains_key(f))))
            }
            Op::HGetAll(k) => Reply::Map(self.hash_ref(k)?.cloned().unwrap_or_default()),
            Op::ExpireIfEq(k, v, secs) => {
                if self.string(k)?.as_deref() == Some(v.as_str()) {
                    return self.apply(&Op::Expire(k.clone(), *secs));
                }
                Reply::Int(0)
            }
            Op::DelIfEq(k, v) => {
                if self.string(k)?.as_deref() == Some(v.as_str()) {
                    Reply::Int(self.del(k))
                } else {
                    Reply::Int(0)
                }
            }
        };
        Ok(reply)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn exec(&self, ops: Vec<Op>) -> Result<Vec<Reply>, StoreError> {
        self.exec_checked(Vec::new(), ops).await?.ok_or(StoreError::CheckFailed)
    }

    async fn exec_checked(&self, checks: Vec<Check>, ops: Vec<Op>) -> Result<Option<Vec<Reply>>, StoreError> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        // Work on a copy so a failing op leaves nothing applied.
        let mut staged = keys.clone();
        let mut space = Keyspace { keys: &mut staged, now: Instant::now() };
        for check in &checks {
            if !space.holds(check)? {
                return Ok(None);
            }
        }
        let replies = ops.iter().map(|op| space.apply(op)).collect::<Result<Vec<_>, _>>()?;
        *keys = staged;
        Ok(Some(replies))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
