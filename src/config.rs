//! Pool configuration.
//!
//! One [`Options`] value is owned by each pool and shared with its
//! connections, so differently configured pools can live side by side.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default idle threshold before a keepalive ping is sent
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default interval of the background health task
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Callback receiving human-readable connection events
pub type EventHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounded redial schedule used by [`ReconnectPolicy::Retry`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Redial attempts before the call fails
    pub max_attempts: u32,
    /// Delay before the first redial
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before redial number `attempt` (1-based).
    ///
    /// Doubles from `initial_backoff`, is capped at `max_backoff`, and has up
    /// to a quarter of random jitter added.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let jitter_cap = (base.as_millis() / 4) as u64;
        if jitter_cap == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

/// What a connection does when the socket fails mid-call.
///
/// The policy is fixed per pool. Protocol errors never retry under either
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Drop the socket and return the error; the next call redials
    FailFast,
    /// Drop the socket, redial with backoff and resend the request
    Retry(RetryPolicy),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Retry(RetryPolicy::default())
    }
}

/// Connection and pool settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Server address, `host:port`
    pub addr: String,
    /// Transport kind; only `tcp` is supported
    pub network: String,
    /// Number of connections dialed at startup
    pub pool_size: usize,
    /// Dial timeout
    pub connect_timeout: Option<Duration>,
    /// Deadline for reading one response
    pub read_timeout: Option<Duration>,
    /// Deadline for writing one request
    pub write_timeout: Option<Duration>,
    /// Inactivity after which the health task sends a ping
    pub idle_timeout: Duration,
    /// How often the health task wakes up
    pub ping_interval: Duration,
    /// Behaviour on socket failure
    pub reconnect: ReconnectPolicy,
    /// Reconnect notifications
    #[serde(skip)]
    pub on_event: Option<EventHook>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8888".to_string(),
            network: "tcp".to_string(),
            pool_size: 8,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: None,
            write_timeout: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            on_event: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("addr", &self.addr)
            .field("network", &self.network)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("reconnect", &self.reconnect)
            .field("on_event", &self.on_event.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl Options {
    /// Default options pointed at `addr`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Reject settings no pool can be built from
    pub fn validate(&self) -> Result<()> {
        if self.network != "tcp" {
            return Err(Error::invalid_argument(format!(
                "unsupported network {:?}, only \"tcp\" is supported",
                self.network
            )));
        }
        if self.addr.is_empty() {
            return Err(Error::invalid_argument("address is empty"));
        }
        if self.pool_size == 0 {
            return Err(Error::invalid_argument("pool size must be at least 1"));
        }
        if self.ping_interval.is_zero() {
            return Err(Error::invalid_argument("ping interval must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn emit(&self, msg: &str) {
        if let Some(hook) = &self.on_event {
            hook(msg);
        }
    }
}
