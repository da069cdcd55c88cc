//! JSON-RPC envelope used by the playback server (`/jsonrpc.js`)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path of the JSON-RPC endpoint relative to the server base URL
pub const RPC_PATH: &str = "jsonrpc.js";

const RPC_METHOD: &str = "slim.request";

/// Request body: `{id, method: "slim.request", params: [player, [command...]]}`
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub id: u32,
    pub method: &'static str,
    pub params: (&'a str, &'a [String]),
}

impl<'a> RpcRequest<'a> {
    pub fn new(player_id: &'a str, command: &'a [String]) -> Self {
        Self {
            id: 1,
            method: RPC_METHOD,
            params: (player_id, command),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
}

/// Build a command list from string literals
pub fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}
