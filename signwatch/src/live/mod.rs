//! Live block pipeline.
//!
//! Every configured peer gets a standing `NewBlock` websocket subscription
//! ([`peer`]). A single forwarding task merges all peer streams, drops
//! copies of a block already seen from another peer ([`dedup`]), and feeds
//! one output channel ([`fan_in`]). Per-peer order is preserved; there is
//! no ordering across peers.

pub mod dedup;
pub mod fan_in;
pub mod message;
pub mod peer;

pub use dedup::DedupQueue;
pub use fan_in::{BlockPipeline, PipelineConfig, forward};
pub use message::{LiveMessage, NewBlock};
pub use peer::{ConnectionState, PeerConfig, PeerConnection, PipelineError};

use crate::query::NoopObserver;

/// Observes pipeline activity for metrics.
pub trait PipelineObserver: Send + Sync {
    fn on_message(&self, _chain: &str, _peer: &str) {}

    fn on_duplicate(&self, _chain: &str) {}

    fn on_reconnect(&self, _chain: &str, _peer: &str) {}
}

impl PipelineObserver for NoopObserver {}
