//! Connection pool management.
//!
//! [`ConnectionPool`] owns a bounded set of live sessions opened through a
//! [`Backend`]. Capacity is enforced with a tokio `Semaphore`: every lent
//! [`PooledConnection`] holds one permit, so at most `max_connections` handles are
//! out at any time and further `acquire` calls suspend until one comes back.
//!
//! # Release accounting
//!
//! A `PooledConnection` goes back to the pool exactly once. `release(self)`
//! consumes the handle, and `Drop` covers every other exit path (errors, panics,
//! abandoned streams). Both paths funnel through an `Option::take`, so a second
//! release is impossible. The connection is pushed onto the idle list before the
//! permit is dropped, so the next waiter finds it there.
//!
//! The idle list sits behind a `std::sync::Mutex` that is never held across an
//! await point. Returning a connection checks `closed` under that lock, so a
//! concurrent [`close`](ConnectionPool::close) either drains it or it is retired.
//!
//! # Cancellation
//!
//! `acquire` may be dropped at any await. A connection taken off the idle list is
//! held by a [`Checkout`] guard until it is lent, and retired from `size` if the
//! guard is dropped first. Expired connections are retired synchronously.

use crate::config::PoolOptions;
use crate::db::backend::{Backend, NativeConnection};
use crate::db::connection::generate_connection_id;
use crate::error::{DbError, DbResult};
use crate::models::Ownership;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

struct IdleConnection {
    conn: Box<dyn NativeConnection>,
    since: Instant,
}

/// Point-in-time pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: u32,
    /// Live sessions, idle or lent.
    pub size: usize,
    pub idle: usize,
    pub lent: usize,
    /// Total successful acquisitions since initialization.
    pub acquired: u64,
    /// Total releases since initialization.
    pub released: u64,
}

/// Bounded pool of backing-store sessions.
pub struct ConnectionPool {
    backend: Arc<dyn Backend>,
    max_connections: u32,
    idle_timeout: Duration,
    acquire_timeout: Duration,
    test_before_acquire: bool,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    size: AtomicUsize,
    lent: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create the pool and open `min_connections` sessions eagerly.
    ///
    /// Any failure here is reported as [`DbError::Configuration`]: bad options,
    /// bad credentials or an unreachable endpoint are fatal for the caller.
    pub async fn initialize(backend: Arc<dyn Backend>, options: &PoolOptions) -> DbResult<Arc<Self>> {
        options
            .validate()
            .map_err(|e| DbError::configuration(e, "Fix the pool options"))?;

        let max_connections = options.max_connections_or_default(false);
        let pool = Arc::new(Self {
            backend,
            max_connections,
            idle_timeout: options.idle_timeout_or_default(),
            acquire_timeout: options.acquire_timeout_or_default(),
            test_before_acquire: options.test_before_acquire_or_default(),
            semaphore: Arc::new(Semaphore::new(max_connections as usize)),
            idle: Mutex::new(Vec::new()),
            size: AtomicUsize::new(0),
            lent: AtomicUsize::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let min_connections = options.min_connections_or_default().min(max_connections);
        for _ in 0..min_connections {
            match pool.backend.connect().await {
                Ok(conn) => {
                    pool.size.fetch_add(1, Ordering::AcqRel);
                    pool.push_idle(conn);
                }
                Err(err) => {
                    pool.close().await;
                    return Err(as_configuration_error(err));
                }
            }
        }

        info!(
            backend = %pool.backend.name(),
            max_connections = max_connections,
            min_connections = min_connections,
            "Connection pool initialized"
        );

        Ok(pool)
    }

    /// Borrow a connection, waiting up to the acquire timeout for a free slot.
    ///
    /// On error nothing has been lent and nothing is owed back.
    pub async fn acquire(self: &Arc<Self>) -> DbResult<PooledConnection> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let permit = match timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                return Err(DbError::acquire(format!(
                    "timed out after {}ms waiting for a connection (max_connections={})",
                    self.acquire_timeout.as_millis(),
                    self.max_connections
                )));
            }
        };

        // The permit is dropped with this future if checkout fails.
        let conn = self.checkout().await?;

        self.lent.fetch_add(1, Ordering::AcqRel);
        self.acquired.fetch_add(1, Ordering::AcqRel);

        let lease = PooledConnection {
            id: generate_connection_id(),
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        };
        debug!(connection_id = %lease.id, lent = self.lent.load(Ordering::Acquire), "Connection acquired");
        Ok(lease)
    }

    /// Current accounting snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_connections: self.max_connections,
            size: self.size.load(Ordering::Acquire),
            idle: self.lock_idle().len(),
            lent: self.lent.load(Ordering::Acquire),
            acquired: self.acquired.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop lending and close every idle connection.
    ///
    /// Waiters in `acquire` fail with [`DbError::PoolClosed`]. Connections still
    /// lent are closed when they come back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.close();

        let drained: Vec<IdleConnection> = self.lock_idle().drain(..).collect();
        let count = drained.len();
        self.size.fetch_sub(count, Ordering::AcqRel);
        for idle in drained {
            close_quietly(idle.conn).await;
        }

        info!(
            backend = %self.backend.name(),
            closed_idle = count,
            still_lent = self.lent.load(Ordering::Acquire),
            "Connection pool closed"
        );
    }

    /// Find a usable idle connection or open a new one. Caller holds a permit.
    async fn checkout(&self) -> DbResult<Box<dyn NativeConnection>> {
        loop {
            let (candidate, expired) = self.take_idle();
            for conn in expired {
                debug!("Closing expired idle connection");
                self.retire(conn);
            }

            let Some(conn) = candidate else {
                let conn = self.backend.connect().await?;
                self.size.fetch_add(1, Ordering::AcqRel);
                return Ok(conn);
            };

            if !self.test_before_acquire {
                return Ok(conn);
            }
            let mut checkout = Checkout {
                pool: self,
                conn: Some(conn),
            };
            let pinged = checkout.ping().await;
            match pinged {
                Ok(()) => return checkout.keep(),
                Err(e) => {
                    warn!(error = %e, "Idle connection failed ping, discarding");
                    checkout.discard().await;
                }
            }
        }
    }

    /// Pop one fresh idle connection and split off the expired ones.
    fn take_idle(&self) -> (Option<Box<dyn NativeConnection>>, Vec<Box<dyn NativeConnection>>) {
        let mut idle = self.lock_idle();
        let mut expired = Vec::new();
        let mut fresh = Vec::with_capacity(idle.len());
        for entry in idle.drain(..) {
            if entry.since.elapsed() >= self.idle_timeout {
                expired.push(entry.conn);
            } else {
                fresh.push(entry);
            }
        }
        *idle = fresh;
        (idle.pop().map(|entry| entry.conn), expired)
    }

    fn push_idle(&self, conn: Box<dyn NativeConnection>) {
        self.lock_idle().push(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn discard(&self, conn: Box<dyn NativeConnection>) {
        self.size.fetch_sub(1, Ordering::AcqRel);
        close_quietly(conn).await;
    }

    /// Drop a connection from the accounting now and close it in the background.
    fn retire(&self, conn: Box<dyn NativeConnection>) {
        self.size.fetch_sub(1, Ordering::AcqRel);
        // Without a runtime the session is just dropped
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(close_quietly(conn));
        }
    }

    /// Take a connection back from a `PooledConnection`. Synchronous so it can run in `Drop`.
    fn release(&self, connection_id: &str, conn: Box<dyn NativeConnection>) {
        self.lent.fetch_sub(1, Ordering::AcqRel);
        self.released.fetch_add(1, Ordering::AcqRel);

        let mut idle = self.lock_idle();
        if self.is_closed() {
            drop(idle);
            self.retire(conn);
            debug!(connection_id = %connection_id, "Connection released to closed pool");
            return;
        }
        idle.push(IdleConnection {
            conn,
            since: Instant::now(),
        });
        drop(idle);

        debug!(connection_id = %connection_id, lent = self.lent.load(Ordering::Acquire), "Connection released");
    }
}

async fn close_quietly(conn: Box<dyn NativeConnection>) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Error while closing connection");
    }
}

/// A connection taken off the idle list and not yet lent.
///
/// Dropped before [`keep`](Self::keep), e.g. when `acquire` is cancelled
/// mid-ping, the connection is retired.
struct Checkout<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Box<dyn NativeConnection>>,
}

impl Checkout<'_> {
    async fn ping(&mut self) -> DbResult<()> {
        match self.conn.as_deref_mut() {
            Some(conn) => conn.ping().await,
            None => Ok(()),
        }
    }

    fn keep(mut self) -> DbResult<Box<dyn NativeConnection>> {
        self.conn
            .take()
            .ok_or_else(|| DbError::internal("checked-out connection already taken"))
    }

    async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn).await;
        }
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("Acquire cancelled while checking an idle connection");
            self.pool.retire(conn);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.backend.name())
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn as_configuration_error(err: DbError) -> DbError {
    match err {
        DbError::Configuration { .. } => err,
        other => {
            let suggestion = other
                .suggestion()
                .unwrap_or("Check the connection string and that the server is reachable")
                .to_string();
            DbError::configuration(format!("Failed to open initial connection: {}", other), suggestion)
        }
    }
}

/// A connection lent by the pool for one execution or one stream.
///
/// Returned to the pool exactly once: explicitly through [`release`](Self::release)
/// or implicitly when dropped.
pub struct PooledConnection {
    id: String,
    conn: Option<Box<dyn NativeConnection>>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ownership(&self) -> Ownership {
        Ownership::Pool
    }

    /// The underlying session.
    pub fn native(&mut self) -> DbResult<&mut (dyn NativeConnection + 'static)> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::internal("pooled connection already released"))
    }

    /// Give the connection back to the pool.
    pub fn release(mut self) {
        self.return_to_pool();
    }

    fn return_to_pool(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(&self.id, conn);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("released", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}
