//! Fan-in of every peer's stream into one deduplicated stream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::PipelineObserver;
use super::dedup::DedupQueue;
use super::message::LiveMessage;
use super::peer::{ConnectionState, PeerConfig, PeerConnection};

/// Buffer of each per-peer channel and of the output channel.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub endpoints: Vec<String>,
    pub use_tls: bool,
    pub reconnect_backoff: Duration,
    pub reconnect_delay: Duration,
    pub stale_timeout: Duration,
    /// Bound on the websocket handshake and the subscribe request.
    pub connect_timeout: Duration,
    pub dedup_capacity: usize,
}

/// Running pipeline: one task per peer plus the forwarding task.
///
/// Dropping the receiver returned by [`BlockPipeline::start`] winds the
/// tasks down; [`BlockPipeline::shutdown`] aborts them immediately.
pub struct BlockPipeline {
    peers: Vec<(String, watch::Receiver<ConnectionState>)>,
    tasks: Vec<JoinHandle<()>>,
}

impl BlockPipeline {
    pub fn start(
        chain: &str,
        config: PipelineConfig,
        observer: Arc<dyn PipelineObserver>,
    ) -> (Self, mpsc::Receiver<LiveMessage>) {
        let mut peers = Vec::with_capacity(config.endpoints.len());
        let mut tasks = Vec::with_capacity(config.endpoints.len() + 1);
        let mut inputs = Vec::with_capacity(config.endpoints.len());

        for url in &config.endpoints {
            let connection = PeerConnection::new(
                chain,
                PeerConfig {
                    url: url.clone(),
                    use_tls: config.use_tls,
                    reconnect_backoff: config.reconnect_backoff,
                    reconnect_delay: config.reconnect_delay,
                    stale_timeout: config.stale_timeout,
                    connect_timeout: config.connect_timeout,
                },
                observer.clone(),
            );
            peers.push((connection.peer().to_string(), connection.state()));

            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            inputs.push(rx);
            tasks.push(tokio::spawn(connection.run(tx)));
        }

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let dedup = Arc::new(Mutex::new(DedupQueue::new(config.dedup_capacity)));
        tasks.push(tokio::spawn(forward(
            chain.to_string(),
            inputs,
            dedup,
            out_tx,
            observer,
        )));

        info!(chain, peers = peers.len(), "live block pipeline started");
        (Self { peers, tasks }, out_rx)
    }

    /// Current connection state of every peer.
    pub fn peer_states(&self) -> Vec<(String, ConnectionState)> {
        self.peers
            .iter()
            .map(|(peer, state)| (peer.clone(), *state.borrow()))
            .collect()
    }

    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for BlockPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receiver_stream(rx: mpsc::Receiver<LiveMessage>) -> BoxStream<'static, LiveMessage> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|message| (message, rx)) }).boxed()
}

/// Drains every input concurrently into `out`, dropping blocks whose key
/// is still in `dedup`. Returns when all inputs end or `out` is closed.
pub async fn forward(
    chain: String,
    inputs: Vec<mpsc::Receiver<LiveMessage>>,
    dedup: Arc<Mutex<DedupQueue<blake3::Hash>>>,
    out: mpsc::Sender<LiveMessage>,
    observer: Arc<dyn PipelineObserver>,
) {
    let mut merged = stream::select_all(inputs.into_iter().map(receiver_stream));

    while let Some(message) = merged.next().await {
        if let Some(key) = message.dedup_key() {
            let fresh = dedup
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key);
            if !fresh {
                observer.on_duplicate(&chain);
                continue;
            }
        }

        if out.send(message).await.is_err() {
            debug!(chain = %chain, "live stream receiver dropped");
            return;
        }
    }
}
