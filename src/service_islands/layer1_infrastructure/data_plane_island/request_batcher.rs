//! Request Batcher
//!
//! Coalesces same-kind store operations into grouped calls. Arrivals
//! fill a pending queue; a size or timer trigger drains it, groups by
//! operation kind, and dispatches each group as one pipelined round
//! trip. Waiters get their own result over a oneshot channel, so one
//! item's failure never fails its neighbors.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::service_islands::layer1_infrastructure::app_config::BatcherConfig;
use crate::service_islands::layer1_infrastructure::store_capability::{
    SearchOptions, SearchReply, Store, StoreOp, StoreReply,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// One logical operation submitted to the batcher
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Key-value operation, batchable through a pipeline
    Store(StoreOp),
    /// Vector search; dispatched individually, the backend has no grouped form
    VectorSearch {
        index: String,
        query: String,
        options: SearchOptions,
    },
}

impl BatchOperation {
    fn kind(&self) -> &'static str {
        match self {
            Self::Store(op) => op.kind(),
            Self::VectorSearch { .. } => "VSEARCH",
        }
    }
}

/// Result of one batched operation
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Store(StoreReply),
    Search(SearchReply),
}

impl BatchOutcome {
    /// Unwrap a store reply, treating a search outcome as a store error
    #[must_use]
    pub fn into_store_reply(self) -> StoreReply {
        match self {
            Self::Store(reply) => reply,
            Self::Search(_) => StoreReply::Error("unexpected search outcome".to_string()),
        }
    }
}

struct BatchItem {
    op: BatchOperation,
    priority: u8,
    store: Arc<dyn Store>,
    submitted_at: Instant,
    tx: oneshot::Sender<GatewayResult<BatchOutcome>>,
}

struct PendingState {
    items: Vec<BatchItem>,
    epoch: u64,
}

struct BatcherShared {
    config: BatcherConfig,
    pending: Mutex<PendingState>,
    flush_semaphore: Arc<Semaphore>,
    // Counters
    submitted: AtomicU64,
    completed: AtomicU64,
    flushes: AtomicU64,
    grouped_calls: AtomicU64,
    individual_retries: AtomicU64,
}

/// Coalescing batcher over the store capability
pub struct RequestBatcher {
    shared: Arc<BatcherShared>,
}

impl RequestBatcher {
    #[must_use]
    pub fn new(config: BatcherConfig) -> Self {
        let flush_semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            shared: Arc::new(BatcherShared {
                config,
                pending: Mutex::new(PendingState {
                    items: Vec::new(),
                    epoch: 0,
                }),
                flush_semaphore,
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                grouped_calls: AtomicU64::new(0),
                individual_retries: AtomicU64::new(0),
            }),
        }
    }

    /// Submit one operation and wait for its result
    ///
    /// Priorities range over `[0, priority_levels)`; higher drains
    /// first within a flush. An optional deadline bounds the wait.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline elapses; `Store` when the operation
    /// itself failed after the grouped call and its individual retry.
    pub async fn execute(
        &self,
        store: &Arc<dyn Store>,
        op: BatchOperation,
        priority: u8,
        deadline: Option<Duration>,
    ) -> GatewayResult<BatchOutcome> {
        let priority = priority.min(self.shared.config.priority_levels.saturating_sub(1));
        let (tx, rx) = oneshot::channel();
        let item = BatchItem {
            op,
            priority,
            store: Arc::clone(store),
            submitted_at: Instant::now(),
            tx,
        };
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        let trigger = {
            let mut pending = self.shared.pending.lock();
            pending.items.push(item);
            if pending.items.len() >= self.shared.config.max_batch_size {
                let items = std::mem::take(&mut pending.items);
                pending.epoch += 1;
                FlushTrigger::Now(items)
            } else if pending.items.len() == 1 {
                FlushTrigger::ArmTimer(pending.epoch)
            } else {
                FlushTrigger::None
            }
        };

        match trigger {
            FlushTrigger::Now(items) => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    Self::dispatch(shared, items).await;
                });
            }
            FlushTrigger::ArmTimer(epoch) => {
                let shared = Arc::clone(&self.shared);
                let wait = Duration::from_millis(shared.config.max_wait_time_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    let items = {
                        let mut pending = shared.pending.lock();
                        if pending.epoch != epoch || pending.items.is_empty() {
                            return;
                        }
                        pending.epoch += 1;
                        std::mem::take(&mut pending.items)
                    };
                    Self::dispatch(shared, items).await;
                });
            }
            FlushTrigger::None => {}
        }

        let outcome = match deadline {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| GatewayError::Timeout("batched operation".to_string()))?,
            None => rx.await,
        };
        outcome.map_err(|_| GatewayError::Store("batch dropped the request".to_string()))?
    }

    /// Drain, group by kind, dispatch, deliver
    async fn dispatch(shared: Arc<BatcherShared>, mut items: Vec<BatchItem>) {
        let _permit = shared.flush_semaphore.acquire().await;
        shared.flushes.fetch_add(1, Ordering::Relaxed);

        // Stable sort keeps submit order within a priority class
        items.sort_by_key(|item| std::cmp::Reverse(item.priority));

        // Group by operation kind, preserving drained order
        let mut groups: Vec<(&'static str, Vec<BatchItem>)> = Vec::new();
        for item in items {
            let kind = item.op.kind();
            match groups.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, group)) => group.push(item),
                None => groups.push((kind, vec![item])),
            }
        }

        for (kind, group) in groups {
            debug!(kind, size = group.len(), "Dispatching batch group");
            if kind == "VSEARCH" {
                Self::dispatch_searches(&shared, group).await;
            } else {
                Self::dispatch_pipelined(&shared, group).await;
            }
        }
    }

    async fn dispatch_searches(shared: &Arc<BatcherShared>, group: Vec<BatchItem>) {
        for item in group {
            let BatchOperation::VectorSearch {
                index,
                query,
                options,
            } = &item.op
            else {
                continue;
            };
            let result = item
                .store
                .ft_search(index, query, options)
                .await
                .map(BatchOutcome::Search);
            shared.completed.fetch_add(1, Ordering::Relaxed);
            let waited = item.submitted_at.elapsed();
            debug!(wait_ms = waited.as_millis() as u64, "Search item completed");
            let _ = item.tx.send(result);
        }
    }

    async fn dispatch_pipelined(shared: &Arc<BatcherShared>, group: Vec<BatchItem>) {
        let ops: Vec<StoreOp> = group
            .iter()
            .filter_map(|item| match &item.op {
                BatchOperation::Store(op) => Some(op.clone()),
                BatchOperation::VectorSearch { .. } => None,
            })
            .collect();
        let store = match group.first() {
            Some(item) => Arc::clone(&item.store),
            None => return,
        };

        shared.grouped_calls.fetch_add(1, Ordering::Relaxed);
        match store.pipeline(ops).await {
            Ok(replies) if replies.len() == group.len() => {
                for (item, reply) in group.into_iter().zip(replies) {
                    if reply.is_error() {
                        Self::retry_individually(shared, item).await;
                    } else {
                        shared.completed.fetch_add(1, Ordering::Relaxed);
                        let _ = item.tx.send(Ok(BatchOutcome::Store(reply)));
                    }
                }
            }
            Ok(replies) => {
                warn!(
                    expected = group.len(),
                    got = replies.len(),
                    "Pipeline reply count mismatch, retrying individually"
                );
                for item in group {
                    Self::retry_individually(shared, item).await;
                }
            }
            Err(e) => {
                debug!(error = %e, "Grouped call failed, retrying items individually");
                for item in group {
                    Self::retry_individually(shared, item).await;
                }
            }
        }
    }

    /// One individual retry after a grouped failure; persistent errors
    /// go back to the waiter alone.
    async fn retry_individually(shared: &Arc<BatcherShared>, item: BatchItem) {
        shared.individual_retries.fetch_add(1, Ordering::Relaxed);
        let BatchOperation::Store(op) = &item.op else {
            let _ = item.tx.send(Err(GatewayError::Store(
                "search op in pipelined group".to_string(),
            )));
            return;
        };
        let result = Self::execute_single(&item.store, op).await;
        shared.completed.fetch_add(1, Ordering::Relaxed);
        let _ = item.tx.send(result.map(BatchOutcome::Store));
    }

    async fn execute_single(store: &Arc<dyn Store>, op: &StoreOp) -> GatewayResult<StoreReply> {
        match op {
            StoreOp::Get { key } => Ok(store
                .get(key)
                .await?
                .map_or(StoreReply::Nil, StoreReply::Text)),
            StoreOp::Set { key, value, ttl } => {
                store.set(key, value, *ttl).await?;
                Ok(StoreReply::Ok)
            }
            StoreOp::Del { keys } => {
                #[allow(clippy::cast_possible_wrap)]
                let removed = store.del(keys).await? as i64;
                Ok(StoreReply::Int(removed))
            }
            StoreOp::HGet { hash, field } => Ok(store
                .hget(hash, field)
                .await?
                .map_or(StoreReply::Nil, StoreReply::Text)),
            StoreOp::HSet { hash, field, value } => {
                store.hset(hash, field, value).await?;
                Ok(StoreReply::Ok)
            }
            StoreOp::JsonGet { key, path } => Ok(store
                .json_get(key, path)
                .await?
                .map_or(StoreReply::Nil, StoreReply::Json)),
            StoreOp::JsonSet { key, path, value } => {
                store.json_set(key, path, value).await?;
                Ok(StoreReply::Ok)
            }
        }
    }

    /// Average items per flush; a proxy for how well traffic coalesces
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn batching_efficiency(&self) -> f64 {
        let flushes = self.shared.flushes.load(Ordering::Relaxed);
        if flushes == 0 {
            return 0.0;
        }
        self.shared.completed.load(Ordering::Relaxed) as f64 / flushes as f64
    }

    /// Batcher statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "submitted": self.shared.submitted.load(Ordering::Relaxed),
            "completed": self.shared.completed.load(Ordering::Relaxed),
            "flushes": self.shared.flushes.load(Ordering::Relaxed),
            "grouped_calls": self.shared.grouped_calls.load(Ordering::Relaxed),
            "individual_retries": self.shared.individual_retries.load(Ordering::Relaxed),
            "batching_efficiency": self.batching_efficiency(),
            "pending": self.shared.pending.lock().items.len(),
        })
    }
}

enum FlushTrigger {
    Now(Vec<BatchItem>),
    ArmTimer(u64),
    None,
}
