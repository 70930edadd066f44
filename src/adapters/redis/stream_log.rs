//! Redis implementation of the stream log.
//!
//! Short commands and scripts share one auto-reconnecting connection manager.
//! Blocking group reads get a dedicated connection per consumer so a long
//! `XREADGROUP ... BLOCK` never stalls the rest of the process.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::StreamReadReply;
use redis::{Client, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::scripts::{ACK_AND_RESCHEDULE, ACK_AND_SEED, ACK_DELETE, FLUSH};
use crate::domain::models::{FlushOrder, DATA_FIELD};
use crate::domain::ports::{
    NodeConnector, PendingEntry, RawEntry, ReadPosition, Rescheduled, SchedulerKeys,
    StreamError, StreamLog,
};

/// Stream log backed by Redis streams, sorted sets and Lua scripts.
pub struct RedisStreamLog {
    client: Client,
    manager: ConnectionManager,
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisStreamLog {
    pub async fn connect(url: &str) -> Result<Self, StreamError> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        debug!(url, "connected stream log");
        Ok(Self {
            client,
            manager,
            readers: Mutex::new(HashMap::new()),
        })
    }

    async fn reader(&self, consumer: &str) -> Result<MultiplexedConnection, StreamError> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    fn map_group_error(err: RedisError, stream: &str, group: &str) -> StreamError {
        if err.code() == Some("NOGROUP") {
            StreamError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            }
        } else {
            StreamError::Redis(err)
        }
    }
}

#[async_trait]
impl StreamLog for RedisStreamLog {
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let mut conn = self.manager.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0-0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Err(err) if err.code() != Some("BUSYGROUP") => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn append(&self, stream: &str, payload: &str) -> Result<String, StreamError> {
        let mut conn = self.manager.clone();
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> Result<Vec<RawEntry>, StreamError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);

        let start = match &position {
            ReadPosition::Backlog(after) => after.clone(),
            ReadPosition::New(block) => {
                if let Some(block) = block {
                    let ms = u64::try_from(block.as_millis()).unwrap_or(u64::MAX).max(1);
                    cmd.arg("BLOCK").arg(ms);
                }
                ">".to_string()
            }
        };
        cmd.arg("STREAMS").arg(stream).arg(start);

        let result: Result<Option<StreamReadReply>, RedisError> = if position.is_backlog() {
            let mut conn = self.manager.clone();
            cmd.query_async(&mut conn).await
        } else {
            let mut conn = self.reader(consumer).await?;
            cmd.query_async(&mut conn).await
        };
        let reply = result.map_err(|err| Self::map_group_error(err, stream, group))?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            if key.key != stream {
                continue;
            }
            for entry in key.ids {
                let payload: String =
                    entry
                        .get(DATA_FIELD)
                        .ok_or_else(|| StreamError::MissingField {
                            stream: stream.to_string(),
                            id: entry.id.clone(),
                            field: DATA_FIELD,
                        })?;
                entries.push(RawEntry {
                    id: entry.id,
                    payload,
                });
            }
        }
        Ok(entries)
    }

    async fn ack_delete(&self, stream: &str, group: &str, ids: &[String])
        -> Result<(), StreamError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: i64 = ACK_DELETE
            .key(stream)
            .arg(group)
            .arg(ids)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
    ) -> Result<PendingEntry, StreamError> {
        let mut conn = self.manager.clone();
        let rows: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg(id)
            .arg(id)
            .arg(1)
            .arg(consumer)
            .query_async(&mut conn)
            .await
            .map_err(|err| Self::map_group_error(err, stream, group))?;

        rows.into_iter()
            .find(|(pending_id, ..)| pending_id == id)
            .map(|(id, consumer, idle_ms, delivery_count)| PendingEntry {
                id,
                consumer,
                idle_ms,
                delivery_count,
            })
            .ok_or_else(|| StreamError::NotPending {
                id: id.to_string(),
                consumer: consumer.to_string(),
            })
    }

    async fn flush(&self, keys: &SchedulerKeys, height: u64, order: FlushOrder)
        -> Result<u64, StreamError> {
        let script = match order {
            FlushOrder::SmallestFirst => &*FLUSH,
        };
        let mut conn = self.manager.clone();
        let moved: u64 = script
            .key(&keys.latest_height)
            .key(&keys.pending_set)
            .key(&keys.stream)
            .arg(DATA_FIELD)
            .arg(height)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn ack_and_reschedule(
        &self,
        keys: &SchedulerKeys,
        id: &str,
        height: u64,
        payload: &str,
    ) -> Result<Rescheduled, StreamError> {
        let mut conn = self.manager.clone();
        let parked: i64 = ACK_AND_RESCHEDULE
            .key(&keys.latest_height)
            .key(&keys.pending_set)
            .key(&keys.stream)
            .arg(&keys.group)
            .arg(DATA_FIELD)
            .arg(id)
            .arg(height)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(if parked == 1 {
            Rescheduled::Pending
        } else {
            Rescheduled::Requeued
        })
    }

    async fn ack_and_seed(
        &self,
        stream: &str,
        group: &str,
        id: &str,
        pending_set: &str,
        payload: &str,
    ) -> Result<(), StreamError> {
        let mut conn = self.manager.clone();
        let _: i64 = ACK_AND_SEED
            .key(stream)
            .key(pending_set)
            .arg(group)
            .arg(id)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn latest_height(&self, key: &str) -> Result<Option<u64>, StreamError> {
        let mut conn = self.manager.clone();
        let height: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(height)
    }

    async fn pending_jobs(&self, pending_set: &str) -> Result<Vec<(String, u64)>, StreamError> {
        let mut conn = self.manager.clone();
        let members: Vec<(String, u64)> = redis::cmd("ZRANGE")
            .arg(pending_set)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn len(&self, stream: &str) -> Result<u64, StreamError> {
        let mut conn = self.manager.clone();
        let len: u64 = redis::cmd("XLEN").arg(stream).query_async(&mut conn).await?;
        Ok(len)
    }
}

/// Connects to the Redis instance of a delivery node.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisNodeConnector;

#[async_trait]
impl NodeConnector for RedisNodeConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn StreamLog>, StreamError> {
        let log: Arc<dyn StreamLog> = Arc::new(RedisStreamLog::connect(url).await?);
        Ok(log)
    }
}
