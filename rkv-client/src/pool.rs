//! # Connection Pool
//!
//! Purpose: Hand distinct connections to concurrent callers so their commands
//! can be outstanding at the same time, reusing sockets between checkouts.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Connections live in one map and are partitioned
//!    into *idle* and *working* ids once they are READY.
//! 2. **Minimal Locking**: The mutex is held only while moving ids between
//!    sets, never across an await, so every transition is atomic with respect
//!    to other pool calls.
//! 3. **Fail Fast**: At capacity with nothing idle, `acquire` errors at once.
//! 4. **Self-Healing**: Lifecycle events remove failed connections, idle
//!    timeouts shrink the pool and a periodic reaper catches anything missed.
//!
//! ## Invariants
//! - `idle ∩ working = ∅`, and both are subsets of the map's keys.
//! - An id being opened is *reserved*: in the map but in neither set. It
//!   leaves the reserved set under the same lock that files it as idle or
//!   working, so the reaper never sees it half-filed.
//! - `actual_count = |map| <= max`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, PoolConfig};
use crate::connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState};
use crate::error::{AbortReason, ClientError, ClientResult};

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections in the map, whatever their state.
    pub actual: usize,
    /// READY connections available for checkout.
    pub idle: usize,
    /// Connections checked out.
    pub working: usize,
    /// Configured minimum.
    pub min: usize,
    /// Configured maximum.
    pub max: usize,
}

#[derive(Default)]
struct PoolState {
    connections: HashMap<ConnectionId, Connection>,
    idle: VecDeque<ConnectionId>,
    working: HashSet<ConnectionId>,
    reserved: HashSet<ConnectionId>,
    closed: bool,
}

impl PoolState {
    /// Inserts a fresh connection and reserves its slot.
    fn reserve(&mut self, template: &ConnectionConfig) -> Connection {
        let conn = Connection::new(template.clone());
        self.connections.insert(conn.id(), conn.clone());
        self.reserved.insert(conn.id());
        conn
    }

    /// Removes `id` from the map and every set.
    fn discard(&mut self, id: ConnectionId) -> Option<Connection> {
        self.idle.retain(|idle| *idle != id);
        self.working.remove(&id);
        self.reserved.remove(&id);
        let conn = self.connections.remove(&id);
        debug_assert!(self.invariants_hold());
        conn
    }

    /// Pops idle ids until a READY one is found; stale ones are discarded and
    /// returned so the caller can close them outside the lock.
    fn checkout_idle(&mut self, stale: &mut Vec<Connection>) -> Option<Connection> {
        while let Some(id) = self.idle.pop_front() {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            if conn.is_ready() {
                let conn = conn.clone();
                self.working.insert(id);
                debug_assert!(self.invariants_hold());
                return Some(conn);
            }
            if let Some(conn) = self.discard(id) {
                stale.push(conn);
            }
        }
        None
    }

    fn is_idle(&self, id: ConnectionId) -> bool {
        self.idle.contains(&id)
    }

    fn invariants_hold(&self) -> bool {
        self.idle.iter().all(|id| !self.working.contains(id))
            && self.idle.iter().all(|id| self.connections.contains_key(id))
            && self.working.iter().all(|id| self.connections.contains_key(id))
            && self.reserved.iter().all(|id| {
                self.connections.contains_key(id)
                    && !self.working.contains(id)
                    && !self.idle.contains(id)
            })
    }
}

struct PoolInner {
    config: PoolConfig,
    template: ConnectionConfig,
    state: Mutex<PoolState>,
    // Signalled whenever a working connection leaves the working set.
    released: Notify,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection pool handle. Clones share the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool and starts its reaper.
    ///
    /// Must be called from within a Tokio runtime. With `prefill` set, the
    /// minimum number of connections is opened in the background.
    pub fn new(config: PoolConfig) -> Self {
        let config = config.normalized();
        let template = config.connection_template();
        let pool = Pool {
            inner: Arc::new(PoolInner {
                config,
                template,
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
            }),
        };

        tokio::spawn(reaper(
            Arc::downgrade(&pool.inner),
            pool.inner.config.reap_interval,
        ));
        if pool.inner.config.prefill {
            let prefill = pool.clone();
            tokio::spawn(async move {
                prefill.ensure_minimum().await;
            });
        }
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn min(&self) -> usize {
        self.inner.config.min
    }

    pub fn max(&self) -> usize {
        self.inner.config.max
    }

    /// Number of connections in the pool, whatever their state.
    pub fn actual_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    pub fn working_count(&self) -> usize {
        self.inner.lock().working.len()
    }

    /// Snapshot of all counters under one lock.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock();
        PoolStatus {
            actual: state.connections.len(),
            idle: state.idle.len(),
            working: state.working.len(),
            min: self.inner.config.min,
            max: self.inner.config.max,
        }
    }

    /// Checks out a READY connection.
    ///
    /// Reuses an idle connection when there is one, otherwise opens a new one
    /// while the pool is below `max`. Fails with
    /// [`ClientError::PoolExhausted`] when neither is possible. The caller
    /// must hand the connection back with [`Pool::release`].
    pub async fn acquire(&self) -> ClientResult<Connection> {
        let mut stale = Vec::new();
        let checkout = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(ClientError::PoolClosed);
            }
            if let Some(conn) = state.checkout_idle(&mut stale) {
                Checkout::Idle(conn)
            } else if state.connections.len() >= self.inner.config.max {
                Checkout::Exhausted
            } else {
                // Reserve the slot before connecting so concurrent callers
                // cannot overshoot `max`.
                Checkout::Open(state.reserve(&self.inner.template))
            }
        };
        close_all(stale);

        match checkout {
            Checkout::Idle(conn) => {
                debug!(id = %conn.id(), "connection checked out");
                Ok(conn)
            }
            Checkout::Open(conn) => self.open_reserved(conn, true).await,
            Checkout::Exhausted => Err(ClientError::PoolExhausted {
                max: self.inner.config.max,
            }),
        }
    }

    /// Checks out a connection wrapped in a guard that releases it on drop.
    pub async fn get(&self) -> ClientResult<PooledConnection> {
        let conn = self.acquire().await?;
        Ok(PooledConnection {
            pool: self.clone(),
            conn,
        })
    }

    /// Connects a reserved connection and files it under working (checkout)
    /// or idle (fill).
    ///
    /// If the returned future is dropped before it completes, the reservation
    /// is given up and the connection removed.
    async fn open_reserved(&self, conn: Connection, checkout: bool) -> ClientResult<Connection> {
        self.watch(&conn);

        let id = conn.id();
        let mut reservation = Reservation {
            pool: self,
            id,
            armed: true,
        };
        conn.connect().await?;

        {
            let mut state = self.inner.lock();
            if !state.closed && state.reserved.remove(&id) {
                if checkout {
                    state.working.insert(id);
                } else {
                    state.idle.push_back(id);
                }
                debug_assert!(state.invariants_hold());
                reservation.armed = false;
                info!(id = %id, actual = state.connections.len(), "pooled connection ready");
                return Ok(conn);
            }
        }

        // Removed or drained while connecting.
        conn.close();
        Err(ClientError::Aborted(AbortReason::Closed))
    }

    /// Returns a checked-out connection to the idle set.
    ///
    /// Unknown ids, ids that are already idle and ids still being opened are
    /// ignored. A connection that failed or closed is removed instead of
    /// being made idle.
    pub fn release(&self, id: ConnectionId) {
        let mut dead = None;
        {
            let mut state = self.inner.lock();
            let Some(conn_state) = state.connections.get(&id).map(Connection::state) else {
                state.idle.retain(|idle| *idle != id);
                state.working.remove(&id);
                return;
            };
            if state.is_idle(id) || state.reserved.contains(&id) {
                return;
            }
            state.working.remove(&id);
            match conn_state {
                ConnectionState::Ready => state.idle.push_back(id),
                ConnectionState::Created | ConnectionState::Connecting => {}
                ConnectionState::Errored | ConnectionState::Closed => dead = state.discard(id),
            }
            debug_assert!(state.invariants_hold());
        }

        if let Some(conn) = dead {
            debug!(id = %id, "released connection is no longer usable");
            conn.close();
        } else {
            debug!(id = %id, "connection returned");
        }
        self.inner.released.notify_waiters();
    }

    /// Closes a connection and forgets it. Returns false for unknown ids.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.inner.lock().discard(id);
        match removed {
            Some(conn) => {
                conn.close();
                info!(id = %id, "connection removed from pool");
                self.inner.released.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Opens connections until `min` is reached. Failures are logged and
    /// counted, never propagated. Returns the number of failed attempts.
    pub async fn ensure_minimum(&self) -> usize {
        let reserved: Vec<Connection> = {
            let mut state = self.inner.lock();
            if state.closed {
                return 0;
            }
            let missing = self.inner.config.min.saturating_sub(state.connections.len());
            (0..missing)
                .map(|_| state.reserve(&self.inner.template))
                .collect()
        };
        if reserved.is_empty() {
            return 0;
        }
        debug!(count = reserved.len(), "opening connections to reach the minimum");

        let mut attempts = JoinSet::new();
        for conn in reserved {
            let pool = self.clone();
            attempts.spawn(async move { pool.open_reserved(conn, false).await });
        }

        let mut failures = 0;
        while let Some(result) = attempts.join_next().await {
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    debug!(error = %err, "minimum connection attempt failed");
                    failures += 1;
                }
                Err(err) => {
                    debug!(error = %err, "minimum connection task failed");
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            warn!(failures, "some connections could not be opened");
        }
        failures
    }

    /// Closes and removes every connection. Refuses (returns false) while any
    /// connection is checked out.
    pub fn drain_and_close(&self) -> bool {
        let drained: Vec<Connection> = {
            let mut state = self.inner.lock();
            if !state.working.is_empty() {
                warn!(working = state.working.len(), "connections still working, could not drain");
                return false;
            }
            state.idle.clear();
            state.reserved.clear();
            state.connections.drain().map(|(_, conn)| conn).collect()
        };
        info!(count = drained.len(), "pool drained");
        close_all(drained);
        true
    }

    /// Drains the pool and opens `min` fresh connections.
    ///
    /// Returns false, leaving the pool untouched, while connections are
    /// checked out.
    pub async fn recycle(&self) -> bool {
        if !self.drain_and_close() {
            warn!("failed to recycle the pool");
            return false;
        }
        self.ensure_minimum().await;
        true
    }

    /// Removes connections that are in neither set, not reserved and past
    /// CREATED.
    ///
    /// Such orphans appear when a lifecycle event was missed. Returns how
    /// many were removed.
    pub fn reap(&self) -> usize {
        let orphans: Vec<Connection> = {
            let mut state = self.inner.lock();
            let ids: Vec<ConnectionId> = state
                .connections
                .iter()
                .filter(|(id, conn)| {
                    !state.is_idle(**id)
                        && !state.working.contains(*id)
                        && !state.reserved.contains(*id)
                        && conn.state() != ConnectionState::Created
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| state.discard(id)).collect()
        };
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "reaped orphaned connections");
        }
        let count = orphans.len();
        close_all(orphans);
        count
    }

    /// Stops handing out connections, waits for every working connection to
    /// be released, then closes everything.
    pub async fn shutdown(&self) {
        self.inner.lock().closed = true;
        info!("pool shutting down");
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.inner.lock().working.is_empty() {
                break;
            }
            released.await;
        }
        self.drain_and_close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Subscribes to a connection's lifecycle events.
    fn watch(&self, conn: &Connection) {
        let mut events = conn.subscribe();
        let pool = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                let pool = Pool { inner };
                match event {
                    ConnectionEvent::Closed { id, state, error } => {
                        if let Some(err) = error {
                            warn!(id = %id, %state, error = %err, "pooled connection failed");
                        }
                        pool.remove(id);
                        break;
                    }
                    ConnectionEvent::IdleTimeout { id } => pool.evict_idle(id),
                }
            }
        });
    }

    /// Evicts an idle connection whose idle timer fired, as long as the pool
    /// stays at or above `min`.
    fn evict_idle(&self, id: ConnectionId) {
        let evicted = {
            let mut state = self.inner.lock();
            if !state.is_idle(id) || state.connections.len() <= self.inner.config.min {
                return;
            }
            state.discard(id)
        };
        if let Some(conn) = evicted {
            warn!(id = %id, "evicting idle connection");
            conn.close();
        }
    }
}

enum Checkout {
    Idle(Connection),
    Open(Connection),
    Exhausted,
}

/// Checked-out connection that returns itself to the pool when dropped.
pub struct PooledConnection {
    pool: Pool,
    conn: Connection,
}

impl PooledConnection {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(self.conn.id());
    }
}

/// Gives up a reservation unless disarmed.
struct Reservation<'a> {
    pool: &'a Pool,
    id: ConnectionId,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(id = %self.id, "connection attempt abandoned");
            self.pool.remove(self.id);
        }
    }
}

fn close_all(connections: Vec<Connection>) {
    for conn in connections {
        conn.close();
    }
}

async fn reaper(pool: Weak<PoolInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            break;
        };
        let pool = Pool { inner };
        if pool.is_closed() {
            break;
        }
        pool.reap();
    }
}
