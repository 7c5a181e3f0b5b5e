//! One standing websocket subscription to one peer.
//!
//! A [`PeerConnection`] cycles through
//! `Disconnected -> Connecting -> Subscribed -> Disconnected` forever.
//! Failing to connect or subscribe waits `reconnect_backoff` before the
//! next attempt. The handshake and the subscribe request are bounded by
//! `connect_timeout`, and the subscription ack by `stale_timeout`.
//! Losing an established subscription, or detecting a stale one (an empty
//! event, or silence for `stale_timeout`), waits the shorter
//! `reconnect_delay` and counts as a reconnect.
//!
//! The loop only ends when the receiving side of its channel is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::PipelineObserver;
use super::message::{Frame, LiveMessage, parse_frame, subscribe_request};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum PipelineError {
    #[error("failed to connect to {peer}: {message}")]
    Connect { peer: String, message: String },
    #[error("failed to subscribe on {peer}: {message}")]
    Subscribe { peer: String, message: String },
    #[error("websocket error from {peer}: {message}")]
    Stream { peer: String, message: String },
    #[error("rpc error from {peer}: {message}")]
    Rpc { peer: String, message: String },
    #[error("{peer} closed the connection")]
    Closed { peer: String },
}

impl PipelineError {
    /// Errors raised before a subscription was established.
    pub fn before_subscription(&self) -> bool {
        matches!(
            self,
            PipelineError::Connect { .. } | PipelineError::Subscribe { .. }
        )
    }
}

#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub url: String,
    /// Always connect over `wss://`, whatever scheme the URL carries.
    pub use_tls: bool,
    pub reconnect_backoff: Duration,
    pub reconnect_delay: Duration,
    pub stale_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Rewrites an endpoint to a websocket URL, forcing `wss` if asked to.
pub fn websocket_url(endpoint: &str, use_tls: bool) -> String {
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), endpoint),
    };
    let secure = use_tls || scheme == "https" || scheme == "wss";
    format!("{}://{rest}", if secure { "wss" } else { "ws" })
}

enum SessionEnd {
    /// Nobody listens any more.
    ReceiverClosed,
    Reconnect(String),
}

pub struct PeerConnection {
    chain: String,
    peer: String,
    config: PeerConfig,
    state: watch::Sender<ConnectionState>,
    observer: Arc<dyn PipelineObserver>,
}

impl PeerConnection {
    pub fn new(chain: impl Into<String>, config: PeerConfig, observer: Arc<dyn PipelineObserver>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            chain: chain.into(),
            peer: websocket_url(&config.url, config.use_tls),
            config,
            state,
            observer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Runs the connection loop, sending every message to `tx`.
    pub async fn run(self, tx: mpsc::Sender<LiveMessage>) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let outcome = self.session(&tx).await;
            self.set_state(ConnectionState::Disconnected);

            let wait = match outcome {
                Ok(SessionEnd::ReceiverClosed) => {
                    debug!(chain = %self.chain, peer = %self.peer, "stream closed, stopping peer");
                    return;
                }
                Ok(SessionEnd::Reconnect(reason)) => {
                    info!(chain = %self.chain, peer = %self.peer, %reason, "reconnecting");
                    self.observer.on_reconnect(&self.chain, &self.peer);
                    self.config.reconnect_delay
                }
                Err(error) => {
                    warn!(chain = %self.chain, peer = %self.peer, %error, "peer connection failed");
                    let before_subscription = error.before_subscription();
                    let message = LiveMessage::Error {
                        peer: self.peer.clone(),
                        message: error.to_string(),
                    };
                    if tx.send(message).await.is_err() {
                        return;
                    }
                    if before_subscription {
                        self.config.reconnect_backoff
                    } else {
                        self.observer.on_reconnect(&self.chain, &self.peer);
                        self.config.reconnect_delay
                    }
                }
            };

            sleep(wait).await;
        }
    }

    async fn session(&self, tx: &mpsc::Sender<LiveMessage>) -> Result<SessionEnd, PipelineError> {
        let (ws, _) = match timeout(self.config.connect_timeout, connect_async(self.peer.as_str())).await {
            Ok(connected) => connected.map_err(|e| PipelineError::Connect {
                peer: self.peer.clone(),
                message: e.to_string(),
            })?,
            Err(_) => {
                return Err(PipelineError::Connect {
                    peer: self.peer.clone(),
                    message: format!(
                        "handshake timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    ),
                });
            }
        };
        let (mut write, mut read) = ws.split();

        let subscribe = write.send(Message::Text(subscribe_request(1)));
        match timeout(self.config.connect_timeout, subscribe).await {
            Ok(sent) => sent.map_err(|e| PipelineError::Subscribe {
                peer: self.peer.clone(),
                message: e.to_string(),
            })?,
            Err(_) => {
                return Err(PipelineError::Subscribe {
                    peer: self.peer.clone(),
                    message: format!(
                        "subscribe request timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    ),
                });
            }
        }

        let mut subscribed = false;
        loop {
            let next = match timeout(self.config.stale_timeout, read.next()).await {
                Ok(next) => next,
                Err(_) if !subscribed => {
                    return Err(PipelineError::Subscribe {
                        peer: self.peer.clone(),
                        message: format!(
                            "no subscription ack within {}ms",
                            self.config.stale_timeout.as_millis()
                        ),
                    });
                }
                Err(_) => {
                    return Ok(SessionEnd::Reconnect(format!(
                        "no message for {}s",
                        self.config.stale_timeout.as_secs()
                    )));
                }
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(PipelineError::Stream {
                        peer: self.peer.clone(),
                        message: e.to_string(),
                    });
                }
                None => {
                    return Err(PipelineError::Closed {
                        peer: self.peer.clone(),
                    });
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(PipelineError::Closed {
                        peer: self.peer.clone(),
                    });
                }
                _ => continue,
            };

            match parse_frame(&text) {
                Frame::Empty if !subscribed => {
                    subscribed = true;
                    self.set_state(ConnectionState::Subscribed);
                    info!(chain = %self.chain, peer = %self.peer, "subscribed to new blocks");
                }
                Frame::Empty => {
                    return Ok(SessionEnd::Reconnect("empty event".to_string()));
                }
                Frame::Block(block) => {
                    debug!(chain = %self.chain, peer = %self.peer, height = block.height, "new block");
                    self.observer.on_message(&self.chain, &self.peer);
                    if tx.send(LiveMessage::Block(block)).await.is_err() {
                        return Ok(SessionEnd::ReceiverClosed);
                    }
                }
                Frame::Error(message) if !subscribed => {
                    return Err(PipelineError::Subscribe {
                        peer: self.peer.clone(),
                        message,
                    });
                }
                Frame::Error(message) => {
                    return Err(PipelineError::Rpc {
                        peer: self.peer.clone(),
                        message,
                    });
                }
                Frame::Ignored => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::NoopObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct CountingObserver {
        reconnects: AtomicUsize,
        messages: AtomicUsize,
    }

    impl PipelineObserver for CountingObserver {
        fn on_message(&self, _chain: &str, _peer: &str) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_reconnect(&self, _chain: &str, _peer: &str) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(url: String) -> PeerConfig {
        PeerConfig {
            url,
            use_tls: false,
            reconnect_backoff: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(10),
            stale_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn block_event(height: i64) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","id":1,"result":{{"query":"tm.event='NewBlock'",
                "data":{{"type":"tendermint/event/NewBlock","value":{{"block":{{"header":
                {{"height":"{height}","time":"2024-05-01T12:00:00Z","proposer_address":"AA"}}}}}}}}}}}}"#
        )
    }

    #[test]
    fn tls_option_forces_secure_scheme() {
        assert_eq!(websocket_url("ws://rpc:26657/websocket", true), "wss://rpc:26657/websocket");
        assert_eq!(websocket_url("ws://rpc:26657/websocket", false), "ws://rpc:26657/websocket");
        assert_eq!(websocket_url("https://rpc.example.com/websocket", false), "wss://rpc.example.com/websocket");
        assert_eq!(websocket_url("rpc:26657/websocket", false), "ws://rpc:26657/websocket");
    }

    #[tokio::test]
    async fn subscribes_forwards_blocks_and_reconnects_on_empty_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut height = 10;
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

                let request = ws.next().await.unwrap().unwrap();
                assert!(request.to_text().unwrap().contains("tm.event='NewBlock'"));

                ws.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()))
                    .await
                    .unwrap();
                ws.send(Message::Text(block_event(height))).await.unwrap();
                ws.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()))
                    .await
                    .unwrap();
                height += 1;
            }
        });

        let observer = Arc::new(CountingObserver::default());
        let peer = PeerConnection::new("cosmos", config(format!("ws://{addr}/websocket")), observer.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(peer.run(tx));

        let mut heights = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                LiveMessage::Block(block) => heights.push(block.height),
                other => panic!("unexpected message {other:?}"),
            }
        }

        assert_eq!(heights, vec![10, 11]);
        assert!(observer.reconnects.load(Ordering::SeqCst) >= 1);
        assert!(observer.messages.load(Ordering::SeqCst) >= 2);
        handle.abort();
    }

    #[tokio::test]
    async fn connect_failure_is_forwarded_as_an_error() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let peer = PeerConnection::new("cosmos", config(format!("ws://{addr}")), Arc::new(NoopObserver));
        let mut state = peer.state();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(peer.run(tx));

        match rx.recv().await.unwrap() {
            LiveMessage::Error { peer, message } => {
                assert_eq!(peer, format!("ws://{addr}"));
                assert!(message.starts_with("failed to connect"));
            }
            other => panic!("unexpected message {other:?}"),
        }

        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_retries_after_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept TCP but never answer the upgrade request.
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });

        let observer = Arc::new(CountingObserver::default());
        let mut cfg = config(format!("ws://{addr}"));
        cfg.connect_timeout = Duration::from_millis(100);
        cfg.reconnect_backoff = Duration::from_millis(10);
        let peer = PeerConnection::new("cosmos", cfg, observer.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(peer.run(tx));

        for _ in 0..2 {
            let message = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("peer should give up on the handshake")
                .unwrap();
            match message {
                LiveMessage::Error { message, .. } => {
                    assert!(message.starts_with("failed to connect"));
                    assert!(message.contains("timed out"));
                }
                other => panic!("unexpected message {other:?}"),
            }
        }

        // Handshake failures wait the backoff and are not reconnects.
        assert_eq!(observer.reconnects.load(Ordering::SeqCst), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn missing_subscription_ack_is_a_subscribe_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Complete the upgrade, read the request, never acknowledge it.
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let _ = ws.next().await;
                held.push(ws);
            }
        });

        let observer = Arc::new(CountingObserver::default());
        let mut cfg = config(format!("ws://{addr}"));
        cfg.stale_timeout = Duration::from_millis(100);
        let peer = PeerConnection::new("cosmos", cfg, observer.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(peer.run(tx));

        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("ack timeout should surface")
            .unwrap();
        match message {
            LiveMessage::Error { message, .. } => {
                assert!(message.starts_with("failed to subscribe"));
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(observer.reconnects.load(Ordering::SeqCst), 0);
        handle.abort();
    }
}
