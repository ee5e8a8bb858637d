//! Connection Pool
//!
//! Bounded, health-checked pool of store sessions. Capacity is a
//! semaphore; checked-out connections hold a permit, so waiters park
//! on the semaphore instead of polling. A maintenance pass trims idle
//! sessions, pings survivors and replaces the dead.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::service_islands::layer1_infrastructure::app_config::PoolConfig;
use crate::service_islands::layer1_infrastructure::store_capability::{
    ConnectionFactory, Store,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Maintenance pass cadence
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// One live session and its bookkeeping
struct PoolSlot {
    id: u64,
    store: Arc<dyn Store>,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
}

struct PoolState {
    idle: VecDeque<PoolSlot>,
    /// Live connections, idle plus checked out
    total: usize,
}

struct PoolInner {
    pool_id: u64,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
    closed: AtomicBool,
    next_conn_id: AtomicU64,
    // Counters
    created: AtomicU64,
    acquired: AtomicU64,
    acquire_timeouts: AtomicU64,
    create_errors: AtomicU64,
    discarded: AtomicU64,
}

/// A connection checked out of the pool
///
/// Exclusive between acquire and release; returning it to the pool is
/// the drop behavior, so a guard can never leak capacity. A connection
/// marked errored is discarded instead of returned.
pub struct PooledConnection {
    slot: Option<PoolSlot>,
    _permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
    errored: AtomicBool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .finish()
    }
}

impl PooledConnection {
    /// The underlying store session
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        // Slot is always present until drop
        &self
            .slot
            .as_ref()
            .unwrap_or_else(|| unreachable!("slot taken before drop"))
            .store
    }

    /// Pool-unique identity of this connection
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot.as_ref().map_or(0, |s| s.id)
    }

    /// Identity of the owning pool
    #[must_use]
    pub fn pool_id(&self) -> u64 {
        self.pool.pool_id
    }

    /// Mark the session as errored; it will be destroyed on release
    pub fn mark_errored(&self) {
        self.errored.store(true, Ordering::SeqCst);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };
        if self.errored.load(Ordering::SeqCst) || self.pool.closed.load(Ordering::SeqCst) {
            self.pool.discarded.fetch_add(1, Ordering::Relaxed);
            let mut state = self.pool.state.lock();
            state.total = state.total.saturating_sub(1);
        } else {
            slot.last_used = Instant::now();
            self.pool.state.lock().idle.push_back(slot);
        }
        // The permit drops with self, waking one waiter
    }
}

/// Bounded, health-checked pool of store sessions
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    maintenance: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create a pool; no connections are opened until first use or the
    /// maintenance pass replenishes the floor.
    #[must_use]
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let max = config.max_connections;
        let inner = Arc::new(PoolInner {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            factory,
            semaphore: Arc::new(Semaphore::new(max)),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
            }),
            closed: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
            create_errors: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        });
        Self {
            inner,
            maintenance: Mutex::new(None),
        }
    }

    /// Check out a connection, creating one when under the cap
    ///
    /// # Errors
    ///
    /// `Timeout` when the acquire deadline elapses (including while a
    /// fresh connection is still being created); `Store` when the pool
    /// is closed or creation keeps failing with capacity available.
    pub async fn acquire(&self) -> GatewayResult<PooledConnection> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Store("connection pool is closed".to_string()));
        }
        let deadline = Instant::now() + self.inner.config.acquire_timeout();

        let permit = timeout(
            self.inner.config.acquire_timeout(),
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            self.inner.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
            GatewayError::Timeout(format!(
                "no connection available within {}ms",
                self.inner.config.acquire_timeout_ms
            ))
        })?
        .map_err(|_| GatewayError::Store("connection pool is closed".to_string()))?;

        // Prefer a warm idle session
        if let Some(mut slot) = self.inner.state.lock().idle.pop_front() {
            slot.last_used = Instant::now();
            slot.use_count += 1;
            self.inner.acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledConnection {
                slot: Some(slot),
                _permit: Some(permit),
                pool: Arc::clone(&self.inner),
                errored: AtomicBool::new(false),
            });
        }

        // Holding a permit with no idle session means we are under the
        // cap: create, bounded by the remaining deadline.
        let mut last_error =
            GatewayError::Store("connection creation never attempted".to_string());
        for _ in 0..=self.inner.config.max_retries {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.inner.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(GatewayError::Timeout(
                    "connection creation exceeded acquire deadline".to_string(),
                ));
            }
            match timeout(remaining, self.inner.factory.connect()).await {
                Ok(Ok(store)) => {
                    let slot = PoolSlot {
                        id: self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed),
                        store,
                        created_at: Instant::now(),
                        last_used: Instant::now(),
                        use_count: 1,
                    };
                    self.inner.state.lock().total += 1;
                    self.inner.created.fetch_add(1, Ordering::Relaxed);
                    self.inner.acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledConnection {
                        slot: Some(slot),
                        _permit: Some(permit),
                        pool: Arc::clone(&self.inner),
                        errored: AtomicBool::new(false),
                    });
                }
                Ok(Err(e)) => {
                    self.inner.create_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "Connection creation failed, retrying");
                    last_error = e;
                }
                Err(_) => {
                    self.inner.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(GatewayError::Timeout(
                        "connection creation exceeded acquire deadline".to_string(),
                    ));
                }
            }
        }
        Err(GatewayError::Store(format!(
            "connection creation kept failing: {last_error}"
        )))
    }

    /// Return a connection to the pool
    ///
    /// Idempotent for foreign connections: a guard from another pool is
    /// ignored here and finds its way home through its own drop.
    pub fn release(&self, conn: PooledConnection) {
        if conn.pool_id() != self.inner.pool_id {
            debug!(
                foreign_pool = conn.pool_id(),
                "Ignoring release of foreign connection"
            );
        }
        drop(conn);
    }

    /// Start the 30-second maintenance loop
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut guard = self.maintenance.lock();
        if guard.is_some() {
            return;
        }
        let pool = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if pool.inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                pool.run_maintenance_once().await;
            }
        }));
    }

    /// One maintenance pass: trim idle, ping survivors, replenish floor
    pub async fn run_maintenance_once(&self) {
        let idle_timeout = self.inner.config.idle_timeout();
        let min = self.inner.config.min_connections;

        // Trim idle sessions past the idle deadline, keeping the floor
        let mut trimmed = 0usize;
        {
            let mut state = self.inner.state.lock();
            while state.total > min {
                let stale = state
                    .idle
                    .front()
                    .is_some_and(|slot| slot.last_used.elapsed() >= idle_timeout);
                if !stale {
                    break;
                }
                if let Some(slot) = state.idle.pop_front() {
                    debug!(
                        connection_id = slot.id,
                        lifetime_secs = slot.created_at.elapsed().as_secs(),
                        uses = slot.use_count,
                        "Trimming idle connection"
                    );
                }
                state.total -= 1;
                trimmed += 1;
            }
        }
        if trimmed > 0 {
            debug!(trimmed, "Trimmed idle connections");
        }

        // Ping idle sessions outside the lock; drop the dead
        let probes: Vec<(u64, Arc<dyn Store>)> = {
            let state = self.inner.state.lock();
            state
                .idle
                .iter()
                .map(|slot| (slot.id, Arc::clone(&slot.store)))
                .collect()
        };
        for (id, store) in probes {
            if store.ping().await.is_err() {
                warn!(connection_id = id, "Idle connection failed ping, removing");
                let mut state = self.inner.state.lock();
                let before = state.idle.len();
                state.idle.retain(|slot| slot.id != id);
                state.total -= before - state.idle.len();
                self.inner.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Replace dead connections up to the floor
        loop {
            {
                let state = self.inner.state.lock();
                if state.total >= min {
                    break;
                }
            }
            match self.inner.factory.connect().await {
                Ok(store) => {
                    let slot = PoolSlot {
                        id: self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed),
                        store,
                        created_at: Instant::now(),
                        last_used: Instant::now(),
                        use_count: 0,
                    };
                    let mut state = self.inner.state.lock();
                    state.idle.push_back(slot);
                    state.total += 1;
                    self.inner.created.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.inner.create_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Replenish connection failed");
                    break;
                }
            }
        }
    }

    /// Drain all connections and refuse further acquires
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        let drained = {
            let mut state = self.inner.state.lock();
            let n = state.idle.len();
            state.total = state.total.saturating_sub(n);
            state.idle.clear();
            n
        };
        debug!(drained, "Connection pool closed");
    }

    /// Live connections (idle plus checked out)
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.inner.state.lock().total
    }

    /// Idle connections waiting for checkout
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Fraction of the cap currently checked out
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        let state = self.inner.state.lock();
        let in_use = state.total.saturating_sub(state.idle.len());
        in_use as f64 / self.inner.config.max_connections as f64
    }

    /// Health: a pool is healthy while it can hand out sessions
    pub async fn health_check(&self) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.acquire().await {
            Ok(conn) => {
                let ok = conn.store().ping().await.is_ok();
                if !ok {
                    conn.mark_errored();
                }
                ok
            }
            Err(_) => false,
        }
    }

    /// Pool statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        let (idle, total) = {
            let state = self.inner.state.lock();
            (state.idle.len(), state.total)
        };
        serde_json::json!({
            "total_connections": total,
            "idle_connections": idle,
            "in_use_connections": total.saturating_sub(idle),
            "max_connections": self.inner.config.max_connections,
            "utilization": self.utilization(),
            "created": self.inner.created.load(Ordering::Relaxed),
            "acquired": self.inner.acquired.load(Ordering::Relaxed),
            "acquire_timeouts": self.inner.acquire_timeouts.load(Ordering::Relaxed),
            "create_errors": self.inner.create_errors.load(Ordering::Relaxed),
            "discarded": self.inner.discarded.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_islands::layer1_infrastructure::store_capability::memory::{
        MemoryConnectionFactory, MemoryStore,
    };

    fn test_pool(min: usize, max: usize, acquire_timeout_ms: u64) -> Arc<ConnectionPool> {
        let factory = Arc::new(MemoryConnectionFactory::new(MemoryStore::new()));
        Arc::new(ConnectionPool::new(
            PoolConfig {
                min_connections: min,
                max_connections: max,
                acquire_timeout_ms,
                idle_timeout_ms: 60_000,
                max_retries: 2,
            },
            factory,
        ))
    }

    #[tokio::test]
    async fn test_acquire_creates_on_demand() {
        let pool = test_pool(0, 2, 200);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.total_connections(), 1);
        drop(conn);
        assert_eq!(pool.idle_connections(), 1);
    }

    #[tokio::test]
    async fn test_errored_connection_is_discarded() {
        let pool = test_pool(0, 2, 200);
        let conn = pool.acquire().await.unwrap();
        conn.mark_errored();
        drop(conn);
        assert_eq!(pool.total_connections(), 0);
        assert_eq!(pool.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_reuse_prefers_idle() {
        let pool = test_pool(0, 2, 200);
        let first = pool.acquire().await.unwrap();
        let first_id = first.id();
        drop(first);
        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id(), first_id);
    }

    #[tokio::test]
    async fn test_maintenance_replenishes_floor() {
        let pool = test_pool(2, 4, 200);
        assert_eq!(pool.total_connections(), 0);
        pool.run_maintenance_once().await;
        assert_eq!(pool.total_connections(), 2);
        assert_eq!(pool.idle_connections(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_acquire() {
        let pool = test_pool(0, 2, 100);
        pool.close().await;
        assert!(pool.acquire().await.is_err());
    }
}
