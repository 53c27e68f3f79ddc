//! Transactional access to the fast key-value store.
//!
//! Every call goes through [`KvStore::exec`], which runs a batch of [`Op`]s
//! atomically and hands back one [`Reply`] per op, in issue order.
//! [`KvStore::exec_checked`] additionally commits only while a set of
//! [`Check`]s still holds, which is how read-then-write operations stay
//! consistent with concurrent writers.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
    #[error("operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),
    #[error("transaction checks no longer hold")]
    CheckFailed,
    #[error("unexpected reply at position {index}: expected {expected}, got {got}")]
    Protocol {
        index: usize,
        expected: &'static str,
        got: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Get(String),
    Set(String, String),
    SetEx(String, String, u64),
    /// `SET key value NX EX ttl`; replies `Int(1)` when the key was written.
    SetNxEx(String, String, u64),
    Del(String),
    Expire(String, u64),
    /// Remaining seconds; -1 without expiry, -2 when the key is absent.
    Ttl(String),
    SAdd(String, Vec<String>),
    SRem(String, Vec<String>),
    SCard(String),
    SIsMember(String, String),
    SMembers(String),
    /// Pops exactly `count` random members of `from`, adds them to `to` and,
    /// when `mark` is set, writes `{prefix}{member}` with the given TTL for
    /// each one. Pops nothing when `from` holds fewer than `count` members.
    SPopInto {
        from: String,
        to: String,
        count: usize,
        mark: Option<(String, u64)>,
    },
    HSet(String, String, String),
    HGet(String, String),
    HDel(String, Vec<String>),
    HExists(String, String),
    HGetAll(String),
    /// Renews the TTL only while the key still holds `value`.
    ExpireIfEq(String, String, u64),
    /// Deletes the key only while it still holds `value`.
    DelIfEq(String, String),
}

/// Condition evaluated at commit time by [`KvStore::exec_checked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// The string at the key equals the value; `None` means the key is absent.
    Equals(String, Option<String>),
    /// The set at the key has at least this many members.
    CardAtLeast(String, usize),
}

impl Check {
    pub fn key(&self) -> &str {
        match self {
            Check::Equals(k, _) | Check::CardAtLeast(k, _) => k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Okay,
    Int(i64),
    Text(String),
    List(Vec<String>),
    Map(HashMap<String, String>),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "nil"),
            Reply::Okay => write!(f, "OK"),
            Reply::Int(i) => write!(f, "int {i}"),
            Reply::Text(s) => write!(f, "text {s:?}"),
            Reply::List(v) => write!(f, "list of {}", v.len()),
            Reply::Map(m) => write!(f, "map of {}", m.len()),
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Runs all ops as one atomic unit. Nothing is applied when this fails.
    async fn exec(&self, ops: Vec<Op>) -> Result<Vec<Reply>, StoreError>;

    /// Like [`exec`](Self::exec), but only commits if every check holds at
    /// that moment. `Ok(None)` means a check failed and nothing was applied.
    async fn exec_checked(&self, checks: Vec<Check>, ops: Vec<Op>) -> Result<Option<Vec<Reply>>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Chainable batch of ops, in the spirit of `redis::pipe()`.
#[derive(Debug, Default, Clone)]
pub struct Transaction {
    checks: Vec<Check>,
    ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    /// Commit only while the string at `key` is `value` (`None`: absent).
    pub fn require_eq(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.checks.push(Check::Equals(key.into(), value));
        self
    }

    /// Commit only while the set at `key` has at least `count` members.
    pub fn require_card_at_least(mut self, key: impl Into<String>, count: usize) -> Self {
        self.checks.push(Check::CardAtLeast(key.into(), count));
        self
    }

    pub fn get(self, key: impl Into<String>) -> Self {
        self.op(Op::Get(key.into()))
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.op(Op::Set(key.into(), value.into()))
    }

    pub fn set_ex(self, key: impl Into<String>, value: impl Into<String>, secs: u64) -> Self {
        self.op(Op::SetEx(key.into(), value.into(), secs))
    }

    pub fn set_nx_ex(self, key: impl Into<String>, value: impl Into<String>, secs: u64) -> Self {
        self.op(Op::SetNxEx(key.into(), value.into(), secs))
    }

    pub fn del(self, key: impl Into<String>) -> Self {
        self.op(Op::Del(key.into()))
    }

    pub fn expire(self, key: impl Into<String>, secs: u64) -> Self {
        self.op(Op::Expire(key.into(), secs))
    }

    pub fn ttl(self, key: impl Into<String>) -> Self {
        self.op(Op::Ttl(key.into()))
    }

    pub fn sadd<I, S>(self, key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.op(Op::SAdd(key.into(), members.into_iter().map(Into::into).collect()))
    }

    pub fn srem<I, S>(self, key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.op(Op::SRem(key.into(), members.into_iter().map(Into::into).collect()))
    }

    pub fn scard(self, key: impl Into<String>) -> Self {
        self.op(Op::SCard(key.into()))
    }

    pub fn sismember(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.op(Op::SIsMember(key.into(), member.into()))
    }

    pub fn smembers(self, key: impl Into<String>) -> Self {
        self.op(Op::SMembers(key.into()))
    }

    pub fn spop_into(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        count: usize,
        mark: Option<(String, u64)>,
    ) -> Self {
        self.op(Op::SPopInto { from: from.into(), to: to.into(), count, mark })
    }

    pub fn hset(self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.op(Op::HSet(key.into(), field.into(), value.into()))
    }

    pub fn hget(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.op(Op::HGet(key.into(), field.into()))
    }

    pub fn hdel(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.op(Op::HDel(key.into(), vec![field.into()]))
    }

    pub fn hexists(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.op(Op::HExists(key.into(), field.into()))
    }

    pub fn hgetall(self, key: impl Into<String>) -> Self {
        self.op(Op::HGetAll(key.into()))
    }

    pub fn expire_if_eq(self, key: impl Into<String>, value: impl Into<String>, secs: u64) -> Self {
        self.op(Op::ExpireIfEq(key.into(), value.into(), secs))
    }

    pub fn del_if_eq(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.op(Op::DelIfEq(key.into(), value.into()))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Runs the batch. A failed check surfaces as [`StoreError::CheckFailed`];
    /// use [`exec_checked`](Self::exec_checked) to react to it instead.
    pub async fn exec(self, store: &dyn KvStore) -> Result<Replies, StoreError> {
        self.exec_checked(store).await?.ok_or(StoreError::CheckFailed)
    }

    /// Runs the batch, `None` when one of the checks did not hold.
    pub async fn exec_checked(self, store: &dyn KvStore) -> Result<Option<Replies>, StoreError> {
        if self.checks.is_empty() {
            if self.ops.is_empty() {
                return Ok(Some(Replies(Vec::new())));
            }
            return store.exec(self.ops).await.map(|r| Some(Replies(r)));
        }
        Ok(store.exec_checked(self.checks, self.ops).await?.map(Replies))
    }
}

/// Positional view over the replies of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replies(pub Vec<Reply>);

impl Replies {
    fn at(&self, index: usize) -> &Reply {
        self.0.get(index).unwrap_or(&Reply::Nil)
    }

    fn mismatch(&self, index: usize, expected: &'static str) -> StoreError {
        StoreError::Protocol { index, expected, got: self.at(index).to_string() }
    }

    pub fn text(&self, index: usize) -> Result<Option<String>, StoreError> {
        match self.at(index) {
            Reply::Nil => Ok(None),
            Reply::Text(s) => Ok(Some(s.clone())),
            Reply::Int(i) => Ok(Some(i.to_string())),
            _ => Err(self.mismatch(index, "text")),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, StoreError> {
        match self.at(index) {
            Reply::Int(i) => Ok(*i),
            Reply::Nil => Ok(0),
            Reply::Text(s) => s.parse().map_err(|_| self.mismatch(index, "integer")),
            _ => Err(self.mismatch(index, "integer")),
        }
    }

    pub fn flag(&self, index: usize) -> Result<bool, StoreError> {
        self.int(index).map(|i| i > 0)
    }

    pub fn list(&self, index: usize) -> Result<Vec<String>, StoreError> {
        match self.at(index) {
            Reply::Nil => Ok(Vec::new()),
            Reply::List(v) => Ok(v.clone()),
            _ => Err(self.mismatch(index, "list")),
        }
    }

    pub fn map(&self, index: usize) -> Result<HashMap<String, String>, StoreError> {
        match self.at(index) {
            Reply::Nil => Ok(HashMap::new()),
            Reply::Map(m) => Ok(m.clone()),
            _ => Err(self.mismatch(index, "map")),
        }
    }
}
