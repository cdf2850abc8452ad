//! In-process tier queues.
//!
//! Three disjoint queues, one per tier. Ordering within a queue is priority
//! first, then `queued_at`, then an insertion sequence so ties stay FIFO.
//! Leasing honours a per-`(tier, owner)` concurrency cap, promotes delayed
//! entries whose backoff has elapsed, and reclaims active leases that have
//! gone silent past the visibility timeout; a reclaimed lease is flagged so
//! the caller can count it as a retry.
//!
//! Completed and failed bookkeeping is retained for a bounded window
//! (24 hours / 7 days) and pruned on the reaper cadence.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::job::QueueTier;

/// Queue observability snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

/// A granted lease.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub tier: QueueTier,
    pub queue_ref: String,
    /// True when this lease was reclaimed from a worker presumed dead; the
    /// job's retry count must be incremented.
    pub reclaimed: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    job_id: Uuid,
    owner_id: Uuid,
    queue_ref: String,
    reclaimed: bool,
}

/// Waiting-set key: priority, then submission time, then sequence.
type OrderKey = (u8, DateTime<Utc>, u64);

struct ActiveLease {
    key: OrderKey,
    entry: Entry,
    worker_id: String,
    last_progress: Instant,
}

struct DelayedEntry {
    ready_at: Instant,
    key: OrderKey,
    entry: Entry,
}

#[derive(Default)]
struct TierState {
    waiting: BTreeMap<OrderKey, Entry>,
    delayed: Vec<DelayedEntry>,
    active: HashMap<Uuid, ActiveLease>,
    completed: Vec<Instant>,
    failed: Vec<Instant>,
}

#[derive(Debug, Clone)]
pub struct TierQueueConfig {
    /// A lease with no progress for this long is presumed dead.
    pub visibility_timeout: Duration,
    pub retain_completed: Duration,
    pub retain_failed: Duration,
}

impl Default for TierQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30 * 60),
            retain_completed: Duration::from_secs(24 * 60 * 60),
            retain_failed: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

pub struct TierQueues {
    states: Mutex<HashMap<QueueTier, TierState>>,
    config: TierQueueConfig,
    sequence: AtomicU64,
}

impl TierQueues {
    pub fn new(config: TierQueueConfig) -> Self {
        let mut states = HashMap::new();
        for tier in QueueTier::ALL {
            states.insert(tier, TierState::default());
        }
        Self {
            states: Mutex::new(states),
            config,
            sequence: AtomicU64::new(0),
        }
    }

    /// Place a job into its tier's waiting set (or the delayed set when
    /// `delay` is non-zero). Returns the broker-local queue handle.
    pub async fn enqueue(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
        tier: QueueTier,
        priority: u8,
        queued_at: DateTime<Utc>,
        delay: Duration,
    ) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let queue_ref = format!("{}:{}", tier.queue_name(), seq);
        let entry = Entry {
            job_id,
            owner_id,
            queue_ref: queue_ref.clone(),
            reclaimed: false,
        };
        let key = (priority, queued_at, seq);

        let mut states = self.states.lock().await;
        let state = states.entry(tier).or_default();
        if delay.is_zero() {
            state.waiting.insert(key, entry);
        } else {
            state.delayed.push(DelayedEntry {
                ready_at: Instant::now() + delay,
                key,
                entry,
            });
        }
        debug!(job_id = %job_id, queue = tier.queue_name(), delay_ms = delay.as_millis() as u64, "enqueued");
        queue_ref
    }

    /// Atomic pop+mark-active honouring the per-owner concurrency cap.
    pub async fn lease(&self, tier: QueueTier, worker_id: &str) -> Option<Lease> {
        let mut states = self.states.lock().await;
        let state = states.entry(tier).or_default();
        let now = Instant::now();

        Self::promote_due(state, now);
        Self::reclaim_expired(state, now, self.config.visibility_timeout);

        // First waiting entry whose owner is under the tier's lease cap.
        let cap = tier.max_leases_per_owner();
        let key = state
            .waiting
            .iter()
            .find(|(_, entry)| {
                let owned = state
                    .active
                    .values()
                    .filter(|lease| lease.entry.owner_id == entry.owner_id)
                    .count();
                owned < cap
            })
            .map(|(key, _)| *key)?;

        let entry = state.waiting.remove(&key)?;
        let lease = Lease {
            job_id: entry.job_id,
            owner_id: entry.owner_id,
            tier,
            queue_ref: entry.queue_ref.clone(),
            reclaimed: entry.reclaimed,
        };
        state.active.insert(
            entry.job_id,
            ActiveLease {
                key,
                entry,
                worker_id: worker_id.to_string(),
                last_progress: now,
            },
        );
        Some(lease)
    }

    fn promote_due(state: &mut TierState, now: Instant) {
        let mut index = 0;
        while index < state.delayed.len() {
            if state.delayed[index].ready_at <= now {
                let delayed = state.delayed.swap_remove(index);
                state.waiting.insert(delayed.key, delayed.entry);
            } else {
                index += 1;
            }
        }
    }

    fn reclaim_expired(state: &mut TierState, now: Instant, visibility_timeout: Duration) {
        let expired: Vec<Uuid> = state
            .active
            .iter()
            .filter(|(_, lease)| now.duration_since(lease.last_progress) >= visibility_timeout)
            .map(|(job_id, _)| *job_id)
            .collect();
        for job_id in expired {
            if let Some(lease) = state.active.remove(&job_id) {
                warn!(
                    job_id = %job_id,
                    worker_id = %lease.worker_id,
                    "lease expired without progress; making job re-leasable"
                );
                // Original key puts it back ahead of newer submissions.
                let mut entry = lease.entry;
                entry.reclaimed = true;
                state.waiting.insert(lease.key, entry);
            }
        }
    }

    /// Progress heartbeat; keeps the lease from being reclaimed mid-render.
    pub async fn touch(&self, job_id: Uuid) {
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            if let Some(lease) = state.active.get_mut(&job_id) {
                lease.last_progress = Instant::now();
                return;
            }
        }
    }

    pub async fn complete(&self, job_id: Uuid) {
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            if state.active.remove(&job_id).is_some() {
                state.completed.push(Instant::now());
                return;
            }
        }
    }

    pub async fn fail(&self, job_id: Uuid) {
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            if state.active.remove(&job_id).is_some() {
                state.failed.push(Instant::now());
                return;
            }
        }
    }

    /// Remove a waiting or delayed job. Returns true when something was
    /// removed; an active lease is untouched (cancellation of running jobs
    /// is cooperative).
    pub async fn remove(&self, job_id: Uuid) -> bool {
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            let waiting_key = state
                .waiting
                .iter()
                .find(|(_, entry)| entry.job_id == job_id)
                .map(|(key, _)| *key);
            if let Some(key) = waiting_key {
                state.waiting.remove(&key);
                return true;
            }
            if let Some(index) = state
                .delayed
                .iter()
                .position(|delayed| delayed.entry.job_id == job_id)
            {
                state.delayed.swap_remove(index);
                return true;
            }
        }
        false
    }

    /// Whether the job is anywhere in queue bookkeeping (waiting, delayed,
    /// or actively leased).
    pub async fn contains(&self, job_id: Uuid) -> bool {
        let states = self.states.lock().await;
        states.values().any(|state| {
            state.active.contains_key(&job_id)
                || state.waiting.values().any(|entry| entry.job_id == job_id)
                || state
                    .delayed
                    .iter()
                    .any(|delayed| delayed.entry.job_id == job_id)
        })
    }

    pub async fn counts(&self, tier: QueueTier) -> QueueCounts {
        let states = self.states.lock().await;
        states
            .get(&tier)
            .map(|state| QueueCounts {
                waiting: state.waiting.len(),
                active: state.active.len(),
                completed: state.completed.len(),
                failed: state.failed.len(),
                delayed: state.delayed.len(),
            })
            .unwrap_or_default()
    }

    /// Drop completed/failed bookkeeping past its retention window.
    pub async fn prune(&self) {
        let now = Instant::now();
        let retain_completed = self.config.retain_completed;
        let retain_failed = self.config.retain_failed;
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            state
                .completed
                .retain(|at| now.duration_since(*at) < retain_completed);
            state
                .failed
                .retain(|at| now.duration_since(*at) < retain_failed);
        }
    }
}

impl Default for TierQueues {
    fn default() -> Self {
        Self::new(TierQueueConfig::default())
    }
}
