//! In-process stream log.
//!
//! Mirrors the Redis stream semantics the pipeline relies on: consumer groups
//! with per-consumer pending lists, delivery counters that grow on every
//! backlog read, and a pending sorted set ordered by (score, member). Every
//! operation runs under one lock, which gives the multi-structure operations
//! the same all-or-nothing behaviour the Lua scripts have on Redis.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::models::FlushOrder;
use crate::domain::ports::{
    PendingEntry, RawEntry, ReadPosition, Rescheduled, SchedulerKeys, StreamError, StreamLog,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StreamError::InvalidId(s.to_string());
        let (ms, seq) = s.split_once('-').unwrap_or((s, "0"));
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug)]
struct PendingRecord {
    consumer: String,
    delivery_count: u64,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingRecord>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, String>,
    groups: HashMap<String, GroupState>,
}

/// Redis-style sorted set: unique members ordered by score, then member.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, u64>,
    ordered: BTreeSet<(u64, String)>,
}

impl SortedSet {
    fn add(&mut self, score: u64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn pop_min(&mut self) -> Option<(u64, String)> {
        let first = self.ordered.pop_first()?;
        self.scores.remove(&first.1);
        Some(first)
    }

    fn min_score(&self) -> Option<u64> {
        self.ordered.first().map(|(score, _)| *score)
    }
}

#[derive(Debug, Default)]
struct State {
    next_ms: u64,
    streams: HashMap<String, StreamState>,
    sorted_sets: HashMap<String, SortedSet>,
    heights: HashMap<String, u64>,
}

impl State {
    fn append(&mut self, stream: &str, payload: &str) -> EntryId {
        self.next_ms += 1;
        let id = EntryId {
            ms: self.next_ms,
            seq: 0,
        };
        self.streams
            .entry(stream.to_string())
            .or_default()
            .entries
            .insert(id, payload.to_string());
        id
    }

    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut StreamState, StreamError> {
        match self.streams.get_mut(stream) {
            Some(state) if state.groups.contains_key(group) => Ok(state),
            _ => Err(StreamError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
        }
    }

    fn ack_delete(&mut self, stream: &str, group: &str, ids: &[EntryId]) {
        if let Some(state) = self.streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                for id in ids {
                    group_state.pending.remove(id);
                }
            }
            for id in ids {
                state.entries.remove(id);
            }
        }
    }

    fn read_new(&mut self, stream: &str, group: &str, consumer: &str, count: usize)
        -> Result<Vec<RawEntry>, StreamError> {
        let state = self.group_mut(stream, group)?;
        let StreamState { entries, groups } = state;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let fresh: Vec<(EntryId, String)> = entries
            .range((
                std::ops::Bound::Excluded(group_state.last_delivered),
                std::ops::Bound::Unbounded,
            ))
            .take(count)
            .map(|(id, payload)| (*id, payload.clone()))
            .collect();

        let now = Instant::now();
        for (id, _) in &fresh {
            group_state.last_delivered = *id;
            group_state.pending.insert(
                *id,
                PendingRecord {
                    consumer: consumer.to_string(),
                    delivery_count: 1,
                    delivered_at: now,
                },
            );
        }

        Ok(fresh
            .into_iter()
            .map(|(id, payload)| RawEntry {
                id: id.to_string(),
                payload,
            })
            .collect())
    }

    fn read_backlog(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<RawEntry>, StreamError> {
        let state = self.group_mut(stream, group)?;
        let StreamState { entries, groups } = state;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut out = Vec::new();
        for (id, record) in group_state.pending.range_mut((
            std::ops::Bound::Excluded(after),
            std::ops::Bound::Unbounded,
        )) {
            if out.len() >= count {
                break;
            }
            if record.consumer != consumer {
                continue;
            }
            let Some(payload) = entries.get(id) else {
                continue;
            };
            record.delivery_count += 1;
            record.delivered_at = now;
            out.push(RawEntry {
                id: id.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(out)
    }
}

/// Stream log held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStreamLog {
    state: Mutex<State>,
    appended: Notify,
}

impl MemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of entries pending for a consumer, oldest first.
    pub async fn pending_ids(&self, stream: &str, group: &str, consumer: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .filter(|(_, record)| record.consumer == consumer)
                    .map(|(id, _)| id.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Payloads currently stored in a stream, oldest first.
    pub async fn payloads(&self, stream: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .map(|s| s.entries.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let mut state = self.state.lock().await;
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn append(&self, stream: &str, payload: &str) -> Result<String, StreamError> {
        let id = self.state.lock().await.append(stream, payload);
        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> Result<Vec<RawEntry>, StreamError> {
        match position {
            ReadPosition::Backlog(after) => {
                let after: EntryId = after.parse()?;
                self.state
                    .lock()
                    .await
                    .read_backlog(stream, group, consumer, after, count)
            }
            ReadPosition::New(block) => {
                let deadline = block.map(|d| Instant::now() + d);
                loop {
                    let notified = self.appended.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let entries = self
                        .state
                        .lock()
                        .await
                        .read_new(stream, group, consumer, count)?;
                    if !entries.is_empty() {
                        return Ok(entries);
                    }

                    let Some(deadline) = deadline else {
                        return Ok(entries);
                    };
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    async fn ack_delete(&self, stream: &str, group: &str, ids: &[String])
        -> Result<(), StreamError> {
        let ids = ids
            .iter()
            .map(|id| id.parse())
            .collect::<Result<Vec<EntryId>, _>>()?;
        self.state.lock().await.ack_delete(stream, group, &ids);
        Ok(())
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
    ) -> Result<PendingEntry, StreamError> {
        let entry_id: EntryId = id.parse()?;
        let state = self.state.lock().await;
        let record = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&entry_id))
            .filter(|record| record.consumer == consumer)
            .ok_or_else(|| StreamError::NotPending {
                id: id.to_string(),
                consumer: consumer.to_string(),
            })?;

        Ok(PendingEntry {
            id: entry_id.to_string(),
            consumer: record.consumer.clone(),
            idle_ms: u64::try_from(record.delivered_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            delivery_count: record.delivery_count,
        })
    }

    async fn flush(&self, keys: &SchedulerKeys, height: u64, order: FlushOrder)
        -> Result<u64, StreamError> {
        let mut moved = 0;
        {
            let mut state = self.state.lock().await;
            state.heights.insert(keys.latest_height.clone(), height);

            let mut due = Vec::new();
            if let Some(set) = state.sorted_sets.get_mut(&keys.pending_set) {
                match order {
                    FlushOrder::SmallestFirst => {
                        while set.min_score().is_some_and(|score| score < height) {
                            if let Some((_, member)) = set.pop_min() {
                                due.push(member);
                            }
                        }
                    }
                }
            }
            for member in due {
                state.append(&keys.stream, &member);
                moved += 1;
            }
        }
        if moved > 0 {
            self.appended.notify_waiters();
        }
        Ok(moved)
    }

    async fn ack_and_reschedule(
        &self,
        keys: &SchedulerKeys,
        id: &str,
        height: u64,
        payload: &str,
    ) -> Result<Rescheduled, StreamError> {
        let entry_id: EntryId = id.parse()?;
        let outcome = {
            let mut state = self.state.lock().await;
            state.ack_delete(&keys.stream, &keys.group, &[entry_id]);

            let caught_up = state
                .heights
                .get(&keys.latest_height)
                .is_none_or(|latest| height >= *latest);
            if caught_up {
                state
                    .sorted_sets
                    .entry(keys.pending_set.clone())
                    .or_default()
                    .add(height, payload);
                Rescheduled::Pending
            } else {
                state.append(&keys.stream, payload);
                Rescheduled::Requeued
            }
        };
        if outcome == Rescheduled::Requeued {
            self.appended.notify_waiters();
        }
        Ok(outcome)
    }

    async fn ack_and_seed(
        &self,
        stream: &str,
        group: &str,
        id: &str,
        pending_set: &str,
        payload: &str,
    ) -> Result<(), StreamError> {
        let entry_id: EntryId = id.parse()?;
        let mut state = self.state.lock().await;
        state.ack_delete(stream, group, &[entry_id]);
        state
            .sorted_sets
            .entry(pending_set.to_string())
            .or_default()
            .add(0, payload);
        Ok(())
    }

    async fn latest_height(&self, key: &str) -> Result<Option<u64>, StreamError> {
        Ok(self.state.lock().await.heights.get(key).copied())
    }

    async fn pending_jobs(&self, pending_set: &str) -> Result<Vec<(String, u64)>, StreamError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_sets
            .get(pending_set)
            .map(|set| {
                set.ordered
                    .iter()
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn len(&self, stream: &str) -> Result<u64, StreamError> {
        let state = self.state.lock().await;
        Ok(state
            .streams
            .get(stream)
            .map_or(0, |s| s.entries.len() as u64))
    }
}

/// Hands out one shared in-memory log per node URL.
#[derive(Debug, Default)]
pub struct MemoryNodeConnector {
    logs: Mutex<HashMap<String, Arc<MemoryStreamLog>>>,
}

impl MemoryNodeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The log backing `url`, created on first use.
    pub async fn log_for(&self, url: &str) -> Arc<MemoryStreamLog> {
        self.logs
            .lock()
            .await
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(MemoryStreamLog::new()))
            .clone()
    }
}

#[async_trait]
impl crate::domain::ports::NodeConnector for MemoryNodeConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn StreamLog>, StreamError> {
        let log: Arc<dyn StreamLog> = self.log_for(url).await;
        Ok(log)
    }
}
