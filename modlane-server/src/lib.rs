//! Ingestion worker and local WebSocket status channel.
//!
//! [`StatusChannelServer`] accepts UI connections on `127.0.0.1` under a
//! fixed set of endpoints:
//!
//! - `/currentTask`: the latest task description. Peers that connect late
//!   immediately receive the most recent status.
//! - `/conversion`: extraction and conversion progress, live only.
//!
//! [`ChannelStatusSink`] and [`ChannelWatchObserver`] plug the channel into
//! the `modlane-core` queue and file watcher.

pub mod channel;
pub mod error;
pub mod handlers;
pub mod infra;
pub mod sink;

pub use channel::StatusChannelServer;
pub use error::{ChannelError, ChannelResult};
pub use infra::config::{ChannelConfig, DEFAULT_PORT, ServeArgs};
pub use sink::{ChannelStatusSink, ChannelWatchObserver};
