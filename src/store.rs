//! Redis-backed storage: ready queues, the delayed-schedule sorted set, and
//! result records.

use std::collections::HashMap;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{self, Value};
use crate::error::{DsqError, DsqResult};
use crate::task::TaskEnvelope;

const SCHEDULE_KEY: &str = "schedule";
const RESCHEDULE_CHUNK: usize = 5000;

fn rqname(queue: &str) -> String {
    format!("queue:{queue}")
}

fn qname(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}

fn assert_valid_queue_name(queue: &str) -> DsqResult<()> {
    if queue.contains(':') {
        return Err(DsqError::InvalidQueueName(queue.to_string()));
    }
    Ok(())
}

/// A snapshot lifted off the stores by [`QueueStore::take_many`], restorable
/// with [`QueueStore::put_many`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    pub schedule: Vec<(Vec<u8>, f64)>,
    pub queues: HashMap<String, Vec<Vec<u8>>>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty() && self.queues.values().all(|v| v.is_empty())
    }
}

/// Record written by a successful or failed task, keyed by task id.
///
/// The success variant's wire key is `result` (not `value`), matching the
/// original store's `{result: value}` record shape so an existing client
/// reading this key stays wire-compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultRecord {
    Success {
        #[serde(rename = "result")]
        value: Value,
    },
    Error {
        error: String,
        message: String,
        trace: String,
    },
}

/// Ready lists plus the delayed-schedule sorted set, over a Redis-compatible
/// async connection.
#[derive(Clone)]
pub struct QueueStore {
    client: redis::Client,
}

impl QueueStore {
    pub fn new(redis_url: &str) -> DsqResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> DsqResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Encode `task` and either `RPUSH` it onto `queue`'s ready list, or
    /// `ZADD` it into the schedule set at `eta` when given.
    pub async fn push(&self, queue: &str, task: &TaskEnvelope, eta: Option<f64>) -> DsqResult<()> {
        assert_valid_queue_name(queue)?;
        let body = codec::encode(task)?;
        let mut conn = self.conn().await?;
        match eta {
            Some(eta) => {
                let mut member = queue.as_bytes().to_vec();
                member.push(b':');
                member.extend_from_slice(&body);
                let _: () = conn.zadd(SCHEDULE_KEY, member, eta).await?;
            }
            None => {
                let _: () = conn.rpush(rqname(queue), body).await?;
            }
        }
        Ok(())
    }

    /// `BLPOP` across `queues` in priority order, returning the queue it
    /// popped from and the decoded envelope. `timeout` of `0` blocks
    /// indefinitely.
    pub async fn pop(
        &self,
        queues: &[String],
        timeout: u64,
    ) -> DsqResult<(Option<String>, Option<TaskEnvelope>)> {
        let keys: Vec<String> = queues.iter().map(|q| rqname(q)).collect();
        let mut conn = self.conn().await?;
        let item: Option<(String, Vec<u8>)> = conn.blpop(keys, timeout as f64).await?;
        match item {
            Some((key, body)) => {
                let task = codec::decode(&body)?;
                Ok((Some(qname(&key).to_string()), Some(task)))
            }
            None => Ok((None, None)),
        }
    }

    /// Promote every schedule entry due at or before `now` (defaults to the
    /// current time) into its ready list. Returns the remaining schedule
    /// cardinality.
    pub async fn reschedule(&self, now: Option<f64>) -> DsqResult<i64> {
        let now = now.unwrap_or_else(unix_now);
        let mut conn = self.conn().await?;

        let (items, _removed, remaining): (Vec<Vec<u8>>, i64, i64) = redis::pipe()
            .zrangebyscore(SCHEDULE_KEY, "-inf", now)
            .zrembyscore(SCHEDULE_KEY, "-inf", now)
            .zcard(SCHEDULE_KEY)
            .query_async(&mut conn)
            .await?;

        for chunk in items.chunks(RESCHEDULE_CHUNK) {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for member in chunk {
                let split = member
                    .iter()
                    .position(|&b| b == b':')
                    .unwrap_or(member.len());
                let queue = String::from_utf8_lossy(&member[..split]).into_owned();
                let body = member[split.saturating_add(1).min(member.len())..].to_vec();
                pipe.rpush(rqname(&queue), body);
            }
            let _: () = pipe.query_async(&mut conn).await?;
        }

        Ok(remaining)
    }

    /// Snapshot up to `count` entries from the schedule and each ready
    /// list, removing them from the store.
    pub async fn take_many(&self, count: isize) -> DsqResult<Batch> {
        let queues = self.queue_list().await?;
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.zrange_withscores(SCHEDULE_KEY, 0, count - 1);
        for q in &queues {
            pipe.lrange(rqname(q), 0, count - 1);
        }
        pipe.zremrangebyrank(SCHEDULE_KEY, 0, count - 1).ignore();
        for q in &queues {
            pipe.ltrim(rqname(q), count, -1).ignore();
        }

        let results: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        let schedule: Vec<(Vec<u8>, f64)> = redis::FromRedisValue::from_redis_value(&results[0])?;
        let mut out = Batch {
            schedule,
            queues: HashMap::new(),
        };
        for (q, value) in queues.iter().zip(results[1..=queues.len()].iter()) {
            let items: Vec<Vec<u8>> = redis::FromRedisValue::from_redis_value(value)?;
            if !items.is_empty() {
                out.queues.insert(q.clone(), items);
            }
        }
        Ok(out)
    }

    /// Restore a [`Batch`] previously removed by [`Self::take_many`].
    pub async fn put_many(&self, batch: &Batch) -> DsqResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut any = false;
        if !batch.schedule.is_empty() {
            let items: Vec<(f64, Vec<u8>)> = batch
                .schedule
                .iter()
                .map(|(body, score)| (*score, body.clone()))
                .collect();
            pipe.zadd_multiple(SCHEDULE_KEY, &items);
            any = true;
        }
        for (queue, items) in &batch.queues {
            if !items.is_empty() {
                pipe.rpush(rqname(queue), items);
                any = true;
            }
        }
        if any {
            let _: () = pipe.query_async(&mut conn).await?;
        }
        Ok(())
    }

    /// All ready-queue names currently present.
    pub async fn queue_list(&self) -> DsqResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = conn.keys(rqname("*")).await?;
        Ok(keys.iter().map(|k| qname(k).to_string()).collect())
    }

    /// Schedule cardinality plus `LLEN` of every ready queue.
    pub async fn stat(&self) -> DsqResult<HashMap<String, i64>> {
        let queues = self.queue_list().await?;
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.zcard(SCHEDULE_KEY);
        for q in &queues {
            pipe.llen(rqname(q));
        }
        let counts: Vec<i64> = pipe.query_async(&mut conn).await?;
        let mut out = HashMap::new();
        out.insert(SCHEDULE_KEY.to_string(), counts[0]);
        for (q, n) in queues.iter().zip(counts[1..].iter()) {
            out.insert(q.clone(), *n);
        }
        Ok(out)
    }

    /// Decode a page of a ready queue for inspection, without removing
    /// entries.
    pub async fn get_queue(
        &self,
        name: &str,
        offset: isize,
        limit: isize,
    ) -> DsqResult<Vec<TaskEnvelope>> {
        let mut conn = self.conn().await?;
        let items: Vec<Vec<u8>> = conn
            .lrange(rqname(name), offset, offset + limit - 1)
            .await?;
        items.iter().map(|b| codec::decode(b)).collect()
    }

    /// Decode a page of the schedule for inspection, without removing
    /// entries.
    pub async fn get_schedule(
        &self,
        offset: isize,
        limit: isize,
    ) -> DsqResult<Vec<(f64, String, TaskEnvelope)>> {
        let mut conn = self.conn().await?;
        let items: Vec<(Vec<u8>, f64)> = conn
            .zrange_withscores(SCHEDULE_KEY, offset, offset + limit - 1)
            .await?;
        items
            .into_iter()
            .map(|(member, score)| {
                let split = member
                    .iter()
                    .position(|&b| b == b':')
                    .unwrap_or(member.len());
                let queue = String::from_utf8_lossy(&member[..split]).into_owned();
                let body = &member[split.saturating_add(1).min(member.len())..];
                let task = codec::decode(body)?;
                Ok((score, queue, task))
            })
            .collect()
    }

    /// Full dump of schedule and ready queues, for debugging and tests.
    pub async fn dump(&self) -> DsqResult<Batch> {
        let queues = self.queue_list().await?;
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.zrange(SCHEDULE_KEY, 0, -1);
        for q in &queues {
            pipe.lrange(rqname(q), 0, -1);
        }
        let results: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        let schedule_bodies: Vec<Vec<u8>> = redis::FromRedisValue::from_redis_value(&results[0])?;
        let schedule = schedule_bodies.into_iter().map(|b| (b, 0.0)).collect();
        let mut out = Batch {
            schedule,
            queues: HashMap::new(),
        };
        for (q, value) in queues.iter().zip(results[1..=queues.len()].iter()) {
            let items: Vec<Vec<u8>> = redis::FromRedisValue::from_redis_value(value)?;
            if !items.is_empty() {
                out.queues.insert(q.clone(), items);
            }
        }
        debug!(queues = out.queues.len(), "dumped store");
        Ok(out)
    }
}

/// Result records, keyed by task id, with a per-record TTL.
#[derive(Clone)]
pub struct ResultStore {
    client: redis::Client,
}

impl ResultStore {
    pub fn new(redis_url: &str) -> DsqResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> DsqResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn set(&self, id: &str, record: &ResultRecord, ttl_secs: u64) -> DsqResult<()> {
        let body = codec::encode(record)?;
        let mut conn = self.conn().await?;
        let _: () = conn.set_ex(id, body, ttl_secs).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DsqResult<Option<ResultRecord>> {
        let mut conn = self.conn().await?;
        let body: Option<Vec<u8>> = conn.get(id).await?;
        match body {
            Some(b) => Ok(Some(codec::decode(&b)?)),
            None => Ok(None),
        }
    }
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_strips_prefix() {
        assert_eq!(qname("queue:normal"), "normal");
    }

    #[test]
    fn rejects_queue_names_with_colon() {
        assert!(assert_valid_queue_name("a:b").is_err());
        assert!(assert_valid_queue_name("ab").is_ok());
    }

    #[test]
    fn batch_is_empty_when_all_parts_empty() {
        let batch = Batch::default();
        assert!(batch.is_empty());
    }
}
