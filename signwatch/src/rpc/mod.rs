//! Chain query client (Cosmos LCD + Tendermint RPC).

pub mod client;
pub mod responses;

pub use client::{ACTIVE_SET_PAGE_SIZE, ChainClient, ClientError, SlashingParams};
