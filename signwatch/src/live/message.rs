//! Messages on the live block stream and the websocket frames they come
//! from.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::rpc::responses::{Header, RpcErrorBody};
use crate::types::{ConsensusAddress, Height};

/// Subscription query for new-block events.
pub const NEW_BLOCK_QUERY: &str = "tm.event='NewBlock'";

/// Notice that a peer saw a new block.
///
/// Only the header is carried; signatures and the active set are resolved
/// by height through the query executor.
#[derive(Clone, Debug, PartialEq)]
pub struct NewBlock {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub proposer: ConsensusAddress,
}

/// One item on the fan-in stream.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveMessage {
    Block(NewBlock),
    /// A peer-level failure, forwarded so the consumer can alert on it.
    Error { peer: String, message: String },
}

impl LiveMessage {
    /// Content hash used to drop copies of the same block from redundant
    /// peers. Errors are never deduplicated.
    pub fn dedup_key(&self) -> Option<blake3::Hash> {
        match self {
            LiveMessage::Block(block) => Some(block_key(block.height)),
            LiveMessage::Error { .. } => None,
        }
    }
}

pub fn block_key(height: Height) -> blake3::Hash {
    blake3::hash(format!("block:{height}").as_bytes())
}

/// JSON-RPC request subscribing to new blocks.
pub fn subscribe_request(id: u64) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "subscribe",
        "id": id,
        "params": { "query": NEW_BLOCK_QUERY },
    })
    .to_string()
}

/// Decoded websocket text frame.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// `result` with no event data: the subscription ack, or a stale
    /// event once subscribed.
    Empty,
    Block(NewBlock),
    Error(String),
    /// Valid JSON that is not a block event.
    Ignored,
}

#[derive(Deserialize)]
struct Envelope {
    result: Option<EventResult>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct EventResult {
    data: Option<EventData>,
}

#[derive(Deserialize)]
struct EventData {
    #[serde(rename = "type", default)]
    kind: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct NewBlockValue {
    block: EventBlock,
}

#[derive(Deserialize)]
struct EventBlock {
    header: Header,
}

pub fn parse_frame(text: &str) -> Frame {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return Frame::Error(format!("malformed frame: {e}")),
    };

    if let Some(error) = envelope.error {
        return Frame::Error(format!("{}: {} {}", error.code, error.message, error.data));
    }

    let Some(result) = envelope.result else {
        return Frame::Ignored;
    };
    let Some(data) = result.data else {
        return Frame::Empty;
    };
    if data.kind != "tendermint/event/NewBlock" {
        return Frame::Ignored;
    }

    match serde_json::from_value::<NewBlockValue>(data.value) {
        Ok(value) => {
            let header = value.block.header;
            Frame::Block(NewBlock {
                height: header.height,
                time: header.time,
                proposer: ConsensusAddress::from_hex(&header.proposer_address),
            })
        }
        Err(e) => Frame::Error(format!("malformed block event: {e}")),
    }
}
