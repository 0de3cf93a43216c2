//! Fixed-size round-robin pool of [`Connection`]s.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{EventHook, Options, ReconnectPolicy};
use crate::connection::Connection;
use crate::types::{Arg, Response};
use crate::{Error, Result};

/// Strict round-robin cursor over `len` slots
#[derive(Debug)]
struct RoundRobin {
    cursor: Mutex<usize>,
    len: usize,
}

impl RoundRobin {
    fn new(len: usize) -> Self {
        Self {
            cursor: Mutex::new(0),
            len,
        }
    }

    fn next(&self) -> usize {
        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idx = *cursor;
        *cursor = (idx + 1) % self.len;
        idx
    }
}

/// Counts calls in flight so shutdown can wait for them
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { tracker: self }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard<'a> {
    tracker: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    connections: Vec<Connection>,
    cursor: RoundRobin,
    options: Arc<Options>,
    in_flight: InFlight,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    /// Flipped once the first `close()` has shut every socket
    closed_done: watch::Sender<bool>,
    health: Mutex<Option<JoinHandle<()>>>,
}

/// A pool of connections to one SSDB server.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Dial `options.pool_size` connections and start the health task.
    ///
    /// Fails if any dial fails; no partial pool is returned.
    pub async fn new(options: Options) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);

        let mut connections = Vec::with_capacity(options.pool_size);
        for _ in 0..options.pool_size {
            connections.push(Connection::connect(options.clone()).await?);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(PoolInner {
            cursor: RoundRobin::new(connections.len()),
            connections,
            options: options.clone(),
            in_flight: InFlight::default(),
            closed: AtomicBool::new(false),
            shutdown,
            closed_done: watch::channel(false).0,
            health: Mutex::new(None),
        });

        let handle = tokio::spawn(health_loop(
            Arc::downgrade(&inner),
            options.ping_interval,
            shutdown_rx,
        ));
        *lock(&inner.health) = Some(handle);

        info!(
            "Created pool of {} connections to {}",
            options.pool_size, options.addr
        );
        Ok(Self { inner })
    }

    /// Execute a command on the next connection in round-robin order
    pub async fn execute(&self, cmd: &str, args: &[Arg]) -> Result<Response> {
        let _guard = self.enter()?;
        self.next_connection().execute(cmd, args).await
    }

    /// Execute a command, giving up when `deadline` passes
    pub async fn execute_deadline(
        &self,
        cmd: &str,
        args: &[Arg],
        deadline: Instant,
    ) -> Result<Response> {
        let _guard = self.enter()?;
        self.next_connection()
            .execute_deadline(cmd, args, deadline)
            .await
    }

    /// Execute a command, giving up after `limit`
    pub async fn execute_timeout(
        &self,
        cmd: &str,
        args: &[Arg],
        limit: Duration,
    ) -> Result<Response> {
        self.execute_deadline(cmd, args, Instant::now() + limit)
            .await
    }

    /// Stop the health task, wait for running calls, then close every socket.
    ///
    /// Calls made after `close` has started fail with [`Error::PoolClosed`].
    /// A later `close` waits for the first one to finish and returns `Ok`;
    /// only the first caller sees socket shutdown errors.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            let mut done = self.inner.closed_done.subscribe();
            let _ = done.wait_for(|done| *done).await;
            return Ok(());
        }
        info!("Closing pool to {}", self.inner.options.addr);

        let _ = self.inner.shutdown.send(true);
        let handle = lock(&self.inner.health).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Health task ended abnormally: {}", e);
            }
        }

        self.inner.in_flight.wait_idle().await;

        let mut first_err = None;
        for conn in &self.inner.connections {
            if let Err(e) = conn.close().await {
                warn!("Failed to close connection to {}: {}", conn.addr(), e);
                first_err.get_or_insert(e);
            }
        }
        self.inner.closed_done.send_replace(true);
        first_err.map_or(Ok(()), Err)
    }

    /// Get the number of connections in the pool
    pub fn size(&self) -> usize {
        self.inner.connections.len()
    }

    /// Settings the pool was built with
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Calls currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count.load(Ordering::SeqCst)
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<InFlightGuard<'_>> {
        // Register before checking, so close() either sees this call or
        // this call sees the closed flag.
        let guard = self.inner.in_flight.enter();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        Ok(guard)
    }

    fn next_connection(&self) -> &Connection {
        &self.inner.connections[self.inner.cursor.next()]
    }
}

async fn health_loop(
    pool: Weak<PoolInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'health: loop {
        let now = tokio::select! {
            now = ticker.tick() => now,
            _ = shutdown.changed() => break,
        };
        let Some(inner) = pool.upgrade() else {
            break;
        };
        if *shutdown.borrow() {
            break;
        }
        for conn in &inner.connections {
            // A ping dropped mid-exchange leaves its socket marked in flight,
            // so the connection discards it before the next use.
            let outcome = tokio::select! {
                outcome = conn.ping(now) => outcome,
                _ = shutdown.changed() => break 'health,
            };
            match outcome {
                Ok(true) => debug!("Keepalive sent to {}", conn.addr()),
                Ok(false) => {}
                Err(e) => warn!("Keepalive to {} failed: {}", conn.addr(), e),
            }
        }
    }
    debug!("Health task stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A builder for configuring and creating a pool
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    options: Options,
}

impl PoolBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing options
    pub fn from_options(options: Options) -> Self {
        Self { options }
    }

    /// Set the server address
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.options.addr = addr.into();
        self
    }

    /// Set the transport kind
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.options.network = network.into();
        self
    }

    /// Set the connection pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.options.pool_size = size;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = Some(timeout);
        self
    }

    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.options.write_timeout = Some(timeout);
        self
    }

    /// Set the idle threshold for keepalive pings
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    /// Set the health task interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.options.ping_interval = interval;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnect = policy;
        self
    }

    /// Set the connection event callback
    pub fn on_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let hook: EventHook = Arc::new(hook);
        self.options.on_event = Some(hook);
        self
    }

    /// Build and connect the pool
    pub async fn connect(self) -> Result<Pool> {
        Pool::new(self.options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_visits_each_slot_in_order() {
        let rr = RoundRobin::new(3);
        let picks: Vec<usize> = (0..9).map(|_| rr.next()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);

        let single = RoundRobin::new(1);
        assert_eq!((single.next(), single.next()), (0, 0));
    }

    #[test]
    fn test_round_robin_under_threads() {
        let rr = Arc::new(RoundRobin::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rr = rr.clone();
                std::thread::spawn(move || (0..100).map(|_| rr.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut counts = [0usize; 4];
        for handle in handles {
            for idx in handle.join().unwrap() {
                counts[idx] += 1;
            }
        }
        assert_eq!(counts, [100, 100, 100, 100]);
    }

    #[tokio::test]
    async fn test_in_flight_wait_idle() {
        let tracker = Arc::new(InFlight::default());
        tracker.wait_idle().await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let held = tracker.clone();
        let task = tokio::spawn(async move {
            let _guard = held.enter();
            let _ = rx.await;
        });
        while tracker.count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send(()).unwrap();
        task.await.unwrap();
        waiter.await.unwrap();
        assert_eq!(tracker.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_builder_rejects_bad_options() {
        let err = PoolBuilder::new()
            .addr("127.0.0.1:1")
            .pool_size(0)
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
