use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use redis::Value;

use super::{Check, KvStore, Op, Reply, StoreError};

const EXPIRE_IF_EQ: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0";

const DEL_IF_EQ: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0";

const SPOP_INTO: &str = r"
if redis.call('SCARD', KEYS[1]) < tonumber(ARGV[1]) then
  return {}
end
local popped = redis.call('SPOP', KEYS[1], ARGV[1])
for _, member in ipairs(popped) do
  redis.call('SADD', KEYS[2], member)
  if ARGV[2] ~= '' then
    redis.call('SET', ARGV[2] .. member, '1', 'EX', ARGV[3])
  end
end
return popped";

/// Redis backed store. Each transaction is one MULTI/EXEC round-trip on a
/// multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("redis url")?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn atomic(ops: &[Op]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in ops {
        queue(&mut pipe, op);
    }
    pipe
}

fn convert_all(ops: &[Op], values: Vec<Value>) -> Result<Vec<Reply>, StoreError> {
    if values.len() != ops.len() {
        return Err(StoreError::Protocol {
            index: values.len(),
            expected: "one reply per op",
            got: format!("{} replies for {} ops", values.len(), ops.len()),
        });
    }
    ops.iter()
        .zip(values)
        .enumerate()
        .map(|(i, (op, value))| convert(i, op, value))
        .collect()
}

fn holds(check: &Check, seen: &Value) -> bool {
    match (check, seen) {
        (Check::Equals(_, expected), Value::Nil) => expected.is_none(),
        (Check::Equals(_, expected), v) => expected.is_some() && val_to_string(v) == *expected,
        (Check::CardAtLeast(_, count), Value::Int(n)) => *n >= *count as i64,
        (Check::CardAtLeast(..), _) => false,
    }
}

fn queue(pipe: &mut redis::Pipeline, op: &Op) {
    match op {
        Op::Get(k) => {
            pipe.cmd("GET").arg(k);
        }
        Op::Set(k, v) => {
            pipe.cmd("SET").arg(k).arg(v);
        }
        Op::SetEx(k, v, secs) => {
            pipe.cmd("SET").arg(k).arg(v).arg("EX").arg(*secs);
        }
        Op::SetNxEx(k, v, secs) => {
            pipe.cmd("SET").arg(k).arg(v).arg("NX").arg("EX").arg(*secs);
        }
        Op::Del(k) => {
            pipe.cmd("DEL").arg(k);
        }
        Op::Expire(k, secs) => {
            pipe.cmd("EXPIRE").arg(k).arg(*secs);
        }
        Op::Ttl(k) => {
            pipe.cmd("TTL").arg(k);
        }
        // Redis rejects variadic commands without members, which would abort
        // the whole MULTI. EXISTS keeps reply positions aligned instead.
        Op::SAdd(k, m) | Op::SRem(k, m) | Op::HDel(k, m) if m.is_empty() => {
            pipe.cmd("EXISTS").arg(k);
        }
        Op::SAdd(k, m) => {
            pipe.cmd("SADD").arg(k).arg(m);
        }
        Op::SRem(k, m) => {
            pipe.cmd("SREM").arg(k).arg(m);
        }
        Op::SCard(k) => {
            pipe.cmd("SCARD").arg(k);
        }
        Op::SIsMember(k, m) => {
            pipe.cmd("SISMEMBER").arg(k).arg(m);
        }
        Op::SMembers(k) => {
            pipe.cmd("SMEMBERS").arg(k);
        }
        Op::SPopInto { from, to, count, mark } => {
            let (prefix, ttl) = mark.clone().unwrap_or_default();
            pipe.cmd("EVAL")
                .arg(SPOP_INTO)
                .arg(2)
                .arg(from)
                .arg(to)
                .arg(*count)
                .arg(prefix)
                .arg(ttl);
        }
        Op::HSet(k, f, v) => {
            pipe.cmd("HSET").arg(k).arg(f).arg(v);
        }
        Op::HGet(k, f) => {
            pipe.cmd("HGET").arg(k).arg(f);
        }
        Op::HDel(k, f) => {
            pipe.cmd("HDEL").arg(k).arg(f);
        }
        Op::HExists(k, f) => {
            pipe.cmd("HEXISTS").arg(k).arg(f);
        }
        Op::HGetAll(k) => {
            pipe.cmd("HGETALL").arg(k);
        }
        Op::ExpireIfEq(k, v, secs) => {
            pipe.cmd("EVAL").arg(EXPIRE_IF_EQ).arg(1).arg(k).arg(v).arg(*secs);
        }
        Op::DelIfEq(k, v) => {
            pipe.cmd("EVAL").arg(DEL_IF_EQ).arg(1).arg(k).arg(v);
        }
    }
}

fn val_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::Int(i) => Some(i.to_string()),
        Value::Status(s) => Some(s.clone()),
        Value::Okay => Some("OK".to_string()),
        Value::Nil | Value::Bulk(_) => None,
    }
}

fn strings(items: &[Value]) -> Vec<String> {
    items.iter().filter_map(val_to_string).collect()
}

fn convert(index: usize, op: &Op, value: Value) -> Result<Reply, StoreError> {
    let protocol = |expected: &'static str, got: &Value| StoreError::Protocol {
        index,
        expected,
        got: format!("{got:?}"),
    };

    let reply = match op {
        Op::SAdd(_, m) | Op::SRem(_, m) | Op::HDel(_, m) if m.is_empty() => Reply::Int(0),
        Op::Get(_) | Op::HGet(..) => match &value {
            Value::Nil => Reply::Nil,
            v => Reply::Text(val_to_string(v).ok_or_else(|| protocol("text", v))?),
        },
        Op::Set(..) | Op::SetEx(..) => Reply::Okay,
        Op::SetNxEx(..) => match value {
            Value::Nil => Reply::Int(0),
            _ => Reply::Int(1),
        },
        Op::SMembers(_) | Op::SPopInto { .. } => match &value {
            Value::Bulk(items) => Reply::List(strings(items)),
            Value::Nil => Reply::List(Vec::new()),
            v => return Err(protocol("list", v)),
        },
        Op::HGetAll(_) => match &value {
            Value::Bulk(items) => {
                let flat = strings(items);
                let map: HashMap<String, String> = flat
                    .chunks_exact(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                Reply::Map(map)
            }
            Value::Nil => Reply::Map(HashMap::new()),
            v => return Err(protocol("map", v)),
        },
        _ => match &value {
            Value::Int(i) => Reply::Int(*i),
            v => return Err(protocol("integer", v)),
        },
    };
    Ok(reply)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn exec(&self, ops: Vec<Op>) -> Result<Vec<Reply>, StoreError> {
        let mut conn = self.conn().await?;
        let values: Vec<Value> = atomic(&ops).query_async(&mut conn).await?;
        convert_all(&ops, values)
    }

    /// WATCH the checked keys, verify them, then MULTI/EXEC. EXEC answers nil
    /// when a watched key changed in between, and the whole round is retried.
    async fn exec_checked(&self, checks: Vec<Check>, ops: Vec<Op>) -> Result<Option<Vec<Reply>>, StoreError> {
        if checks.is_empty() {
            return self.exec(ops).await.map(Some);
        }
        // WATCH state is per connection, so the shared multiplexed one won't do.
        let mut conn = self.client.get_async_connection().await?;
        let watched: Vec<&str> = checks.iter().map(Check::key).collect();
        loop {
            redis::cmd("WATCH").arg(&watched).query_async::<_, ()>(&mut conn).await?;
            let mut read = redis::pipe();
            for check in &checks {
                match check {
                    Check::Equals(k, _) => read.cmd("GET").arg(k),
                    Check::CardAtLeast(k, _) => read.cmd("SCARD").arg(k),
                };
            }
            let seen: Vec<Value> = read.query_async(&mut conn).await?;
            if !checks.iter().zip(&seen).all(|(check, value)| holds(check, value)) {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Ok(None);
            }
            if ops.is_empty() {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Ok(Some(Vec::new()));
            }
            let committed: Option<Vec<Value>> = atomic(&ops).query_async(&mut conn).await?;
            match committed {
                Some(values) => return convert_all(&ops, values).map(Some),
                None => tracing::debug!(keys = ?watched, "watched key changed before commit, retrying"),
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hgetall_pairs_flat_reply() {
        let op = Op::HGetAll("Raffle:1:confirmed".into());
        let value = Value::Bulk(vec![
            Value::Data(b"42".to_vec()),
            Value::Data(b"Name#1234".to_vec()),
        ]);
        let reply = convert(0, &op, value).unwrap();
        let mut expected = HashMap::new();
        expected.insert("42".to_string(), "Name#1234".to_string());
        assert_eq!(reply, Reply::Map(expected));
    }

    #[test]
    fn set_nx_maps_nil_to_not_written() {
        let op = Op::SetNxEx("Raffle:1:lock".into(), "abc".into(), 7);
        assert_eq!(convert(0, &op, Value::Nil).unwrap(), Reply::Int(0));
        assert_eq!(convert(0, &op, Value::Okay).unwrap(), Reply::Int(1));
    }

    #[test]
    fn checks_read_redis_values() {
        let state = Check::Equals("Raffle:1:state".into(), Some("Closed".into()));
        assert!(holds(&state, &Value::Data(b"Closed".to_vec())));
        assert!(!holds(&state, &Value::Data(b"In progress".to_vec())));
        assert!(!holds(&state, &Value::Nil));
        assert!(holds(&Check::Equals("Raffle:1:state".into(), None), &Value::Nil));

        let card = Check::CardAtLeast("Raffle:1:entries".into(), 3);
        assert!(holds(&card, &Value::Int(3)));
        assert!(!holds(&card, &Value::Int(2)));
    }

    #[test]
    fn empty_variadic_ops_reply_zero() {
        let op = Op::SRem("Raffle:1:pending".into(), vec![]);
        assert_eq!(convert(0, &op, Value::Int(1)).unwrap(), Reply::Int(0));
    }
}
