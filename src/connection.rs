//! A single SSDB connection.
//!
//! The socket, its buffers and the last-activity clock live in one
//! mutex-guarded cell. Every call, keepalive ping and redial goes through
//! that lock, so at most one request is on the wire per socket and the
//! socket is never swapped under a running exchange.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::{Options, ReconnectPolicy};
use crate::types::{Arg, Response};
use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 8 * 1024;
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Command sent by keepalive pings
pub const PING_COMMAND: &str = "ping";

/// Everything guarded by the connection lock
#[derive(Debug)]
struct Slot {
    /// Current socket; `None` after a failure until the next redial
    stream: Option<BufReader<TcpStream>>,
    /// Reusable request buffer
    write_buf: BytesMut,
    /// Last successful exchange
    last_activity: Instant,
    /// Set while a request is on the wire; still set on entry means the
    /// previous call was cancelled mid-exchange
    in_flight: bool,
}

/// A connection to an SSDB server
#[derive(Debug)]
pub struct Connection {
    /// Socket cell
    slot: Mutex<Slot>,
    /// Shared settings
    options: Arc<Options>,
}

impl Connection {
    /// Dial `options.addr` and wrap the socket
    pub async fn connect(options: Arc<Options>) -> Result<Self> {
        let stream = dial(&options).await?;
        info!("Connected to SSDB server at {}", options.addr);
        Ok(Self {
            slot: Mutex::new(Slot {
                stream: Some(stream),
                write_buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
                last_activity: Instant::now(),
                in_flight: false,
            }),
            options,
        })
    }

    /// Server address
    pub fn addr(&self) -> &str {
        &self.options.addr
    }

    /// Execute a command and return the response.
    ///
    /// Failures are handled per the configured [`ReconnectPolicy`].
    pub async fn execute(&self, cmd: &str, args: &[Arg]) -> Result<Response> {
        let mut slot = self.slot.lock().await;
        self.execute_locked(&mut slot, cmd, args).await
    }

    /// Execute a command, giving up when `deadline` passes.
    ///
    /// Waiting for the lock counts against the deadline. If it fires
    /// mid-exchange the socket is discarded before its next use.
    pub async fn execute_deadline(
        &self,
        cmd: &str,
        args: &[Arg],
        deadline: Instant,
    ) -> Result<Response> {
        timeout_at(deadline, self.execute(cmd, args)).await?
    }

    /// [`execute_deadline`](Self::execute_deadline) with a relative timeout
    pub async fn execute_timeout(
        &self,
        cmd: &str,
        args: &[Arg],
        limit: Duration,
    ) -> Result<Response> {
        self.execute_deadline(cmd, args, Instant::now() + limit).await
    }

    /// Send a keepalive if the connection has been idle past `idle_timeout`.
    ///
    /// Returns `Ok(true)` when a ping was sent and `Ok(false)` when the
    /// connection was recently used or is busy serving another call.
    pub async fn ping(&self, now: Instant) -> Result<bool> {
        let Ok(mut slot) = self.slot.try_lock() else {
            return Ok(false);
        };
        if now < slot.last_activity + self.options.idle_timeout {
            return Ok(false);
        }
        debug!("Pinging idle connection to {}", self.options.addr);
        self.execute_locked(&mut slot, PING_COMMAND, &[]).await?;
        Ok(true)
    }

    /// Whether a socket is currently held
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.stream.is_some()
    }

    /// Shut the socket down. A later call redials.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if let Some(mut stream) = slot.stream.take() {
            stream.get_mut().shutdown().await?;
            debug!("Closed connection to {}", self.options.addr);
        }
        Ok(())
    }

    async fn execute_locked(
        &self,
        slot: &mut Slot,
        cmd: &str,
        args: &[Arg],
    ) -> Result<Response> {
        if slot.in_flight {
            warn!(
                "Discarding connection to {} left mid-request by a cancelled call",
                self.options.addr
            );
            slot.stream = None;
            slot.in_flight = false;
        }

        slot.write_buf.clear();
        codec::encode_command(cmd, args, &mut slot.write_buf)?;
        debug!("Executing command: {} ({} args)", cmd, args.len());

        let mut attempts = 0u32;
        loop {
            let err = match self.round_trip(slot).await {
                Ok(response) => {
                    slot.last_activity = Instant::now();
                    return Ok(response);
                }
                Err(err) => err,
            };

            slot.stream = None;
            slot.in_flight = false;
            warn!("Connection to {} broken: {}", self.options.addr, err);

            if !err.is_recoverable() {
                return Err(err);
            }
            let retry = match self.options.reconnect {
                ReconnectPolicy::FailFast => return Err(err),
                ReconnectPolicy::Retry(retry) => retry,
            };

            attempts += 1;
            if attempts > retry.max_attempts {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.options.addr, retry.max_attempts
                );
                return Err(Error::RetriesExhausted {
                    attempts: retry.max_attempts,
                    source: Box::new(err),
                });
            }
            self.options.emit(&format!(
                "reconnect attempt {} to {} after error [{}] on command [{}]",
                attempts, self.options.addr, err, cmd
            ));
            tokio::time::sleep(retry.backoff(attempts)).await;
        }
    }

    /// Write the encoded request and read one response, redialing first if
    /// the slot holds no socket.
    async fn round_trip(&self, slot: &mut Slot) -> Result<Response> {
        if slot.stream.is_none() {
            let stream = dial(&self.options).await?;
            info!("Reconnected to SSDB server at {}", self.options.addr);
            self.options
                .emit(&format!("reconnected to {}", self.options.addr));
            slot.stream = Some(stream);
        }
        let Slot {
            stream,
            write_buf,
            in_flight,
            ..
        } = slot;
        let stream = stream
            .as_mut()
            .ok_or_else(|| Error::connection("no socket after dial"))?;

        *in_flight = true;
        let write = async {
            let socket = stream.get_mut();
            socket.write_all(&write_buf[..]).await?;
            socket.flush().await
        };
        match self.options.write_timeout {
            Some(limit) => timeout(limit, write).await??,
            None => write.await?,
        }

        let response = match self.options.read_timeout {
            Some(limit) => timeout(limit, codec::read_response(stream)).await??,
            None => codec::read_response(stream).await?,
        };
        *in_flight = false;
        Ok(response)
    }
}

async fn dial(options: &Options) -> Result<BufReader<TcpStream>> {
    let connect = TcpStream::connect(options.addr.as_str());
    let stream = match options.connect_timeout {
        Some(limit) => timeout(limit, connect).await?,
        None => connect.await,
    }
    .map_err(|e| Error::connection(format!("failed to connect to {}: {}", options.addr, e)))?;
    stream.set_nodelay(true)?;
    Ok(BufReader::with_capacity(READ_BUFFER_SIZE, stream))
}
