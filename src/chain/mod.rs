// src/chain/mod.rs
pub mod rpc;

pub use rpc::{parse_quantity, RpcClient, RpcError};
