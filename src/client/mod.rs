pub mod chunked;
pub mod http;
pub mod rpc;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use chunked::ChunkDecoder;
pub use http::HttpTransport;

/// Network access needed by the self test.
///
/// Requests that fail in transport or return something that is not JSON
/// yield nothing; the caller decides how long it is willing to wait.
#[async_trait]
pub trait HelperTransport: Send + Sync {
    /// GET `url` and decode the whole body as one JSON value
    async fn fetch_json(&self, url: &str) -> Option<Value>;

    /// GET `url` and decode a newline-delimited JSON feed as it arrives
    fn fetch_chunked(&self, url: &str) -> ChunkedFeed;

    /// Send a command for `player_id` to the playback server and return its `result`
    async fn server_request(&self, player_id: &str, command: &[String]) -> Option<Value>;
}

/// Handle on a running chunked request.
///
/// Values are read with [`ChunkedFeed::next`]. Aborting the handle, or
/// dropping it, stops the background reader so nothing is delivered later.
pub struct ChunkedFeed {
    receiver: mpsc::UnboundedReceiver<Value>,
    reader: Option<JoinHandle<()>>,
}

impl ChunkedFeed {
    pub fn new(receiver: mpsc::UnboundedReceiver<Value>, reader: JoinHandle<()>) -> Self {
        Self {
            receiver,
            reader: Some(reader),
        }
    }

    /// Wait for the next value.
    ///
    /// Once the connection is closed or the feed aborted this never resolves,
    /// so a surrounding timeout decides what happens next.
    pub async fn next(&mut self) -> Value {
        match self.receiver.recv().await {
            Some(value) => value,
            None => std::future::pending().await,
        }
    }

    /// Stop the request. Safe to call more than once.
    pub fn abort(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_aborted(&self) -> bool {
        self.reader.is_none()
    }
}

impl Drop for ChunkedFeed {
    fn drop(&mut self) {
        self.abort();
    }
}
