//! # SSDB Client
//!
//! Async Rust driver for [SSDB](https://github.com/ideawu/ssdb), speaking its
//! length-prefixed text protocol over plain TCP.
//!
//! ## Features
//!
//! - **Binary-safe framing** - Arguments and payloads are raw bytes; decoding
//!   tolerates frames split across any number of reads
//! - **Connection Pooling** - A fixed set of connections picked in strict
//!   round-robin order
//! - **Reconnect Policies** - Fail fast, or redial with bounded exponential
//!   backoff, chosen once per pool
//! - **Idle Keepalives** - A background task pings connections that have been
//!   quiet for too long
//! - **Graceful Shutdown** - `close()` waits for running calls before closing
//!   sockets
//!
//! ## Example
//! ```no_run
//! use ssdb_client::{args, PoolBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pool = PoolBuilder::new()
//!         .addr("127.0.0.1:8888")
//!         .pool_size(4)
//!         .connect()
//!         .await?;
//!
//!     pool.execute("hset", &args!["user:1", "name", "ada"]).await?;
//!     let reply = pool.execute("hget", &args!["user:1", "name"]).await?;
//!     println!("name = {:?}", reply.as_str());
//!
//!     pool.close().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod types;

pub mod codec;
pub mod config;
mod connection;
mod error;
mod pool;

pub use config::{EventHook, Options, ReconnectPolicy, RetryPolicy};
pub use connection::{Connection, PING_COMMAND};
pub use error::Error;
pub use pool::{Pool, PoolBuilder};
pub use types::{Arg, Response, Status};

/// Custom result type for SSDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Re-export of the `bytes` crate for convenience
pub use bytes;
