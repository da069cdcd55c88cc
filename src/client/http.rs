//! HTTP transport for the helper app and the playback server

use super::chunked::ChunkDecoder;
use super::rpc::{RpcRequest, RpcResponse, RPC_PATH};
use super::{ChunkedFeed, HelperTransport};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// reqwest based [`HelperTransport`]
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// Server base URL ending with '/'
    server_url: String,
}

impl HttpTransport {
    /// Create a transport posting player commands to `server_url`.
    ///
    /// No request timeout is set on the client: feeds are long-lived and every
    /// step enforces its own deadline.
    pub fn new(server_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("spotify-selftest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            server_url: server_url.to_string(),
        })
    }

    fn rpc_url(&self) -> String {
        format!("{}{}", self.server_url, RPC_PATH)
    }
}

/// Parse a complete response body, dropping anything that is not JSON
pub fn decode_json(body: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("Dropping non-JSON response ({} bytes): {}", body.len(), e);
            None
        }
    }
}

#[async_trait]
impl HelperTransport for HttpTransport {
    async fn fetch_json(&self, url: &str) -> Option<Value> {
        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!("GET {} failed: {}", url, e);
                return None;
            }
        };

        match response.text().await {
            Ok(body) => decode_json(&body),
            Err(e) => {
                log::debug!("Reading {} failed: {}", url, e);
                None
            }
        }
    }

    fn fetch_chunked(&self, url: &str) -> ChunkedFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = url.to_string();

        let reader = tokio::spawn(async move {
            let mut response = match client.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    log::debug!("GET {} failed: {}", url, e);
                    return;
                }
            };

            let mut decoder = ChunkDecoder::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        for value in decoder.push(&bytes) {
                            if sender.send(value).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        log::debug!("Feed {} closed by server", url);
                        return;
                    }
                    Err(e) => {
                        log::debug!("Feed {} failed: {}", url, e);
                        return;
                    }
                }
            }
        });

        ChunkedFeed::new(receiver, reader)
    }

    async fn server_request(&self, player_id: &str, command: &[String]) -> Option<Value> {
        let url = self.rpc_url();
        let body = RpcRequest::new(player_id, command);

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!("POST {} failed: {}", url, e);
                return None;
            }
        };

        match response.json::<RpcResponse>().await {
            Ok(rpc) => rpc.result,
            Err(e) => {
                log::debug!("Unreadable reply to {:?}: {}", command, e);
                None
            }
        }
    }
}
