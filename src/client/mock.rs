//! Scripted in-memory transport for runner tests

use super::{ChunkedFeed, HelperTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct MockTransport {
    /// Queued replies per URL; an empty queue never answers
    json: Mutex<HashMap<String, VecDeque<Value>>>,
    /// Feed script per URL: (delay before the value, value). The feed stays
    /// open after the script ran out.
    feeds: Mutex<HashMap<String, Vec<(Duration, Value)>>>,
    /// RPC results keyed by the command name
    rpc_results: Mutex<HashMap<String, Value>>,
    /// Commands the server never answers
    rpc_silent: Mutex<Vec<String>>,
    /// Every URL requested, in order
    pub requests: Mutex<Vec<String>>,
    /// Every command sent to the server
    pub rpc_calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply for `url`
    pub fn json(self, url: &str, value: Value) -> Self {
        self.json
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(value);
        self
    }

    /// Script the feed for `url`, delays given in ms
    pub fn feed(self, url: &str, script: Vec<(u64, Value)>) -> Self {
        let script = script
            .into_iter()
            .map(|(ms, v)| (Duration::from_millis(ms), v))
            .collect();
        self.feeds.lock().unwrap().insert(url.to_string(), script);
        self
    }

    pub fn rpc(self, command: &str, result: Value) -> Self {
        self.rpc_results
            .lock()
            .unwrap()
            .insert(command.to_string(), result);
        self
    }

    /// Let `command` requests hang forever
    pub fn rpc_silent(self, command: &str) -> Self {
        self.rpc_silent.lock().unwrap().push(command.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Commands sent whose first word is `command`
    pub fn calls_to(&self, command: &str) -> Vec<(String, Vec<String>)> {
        self.rpc_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, params)| params.first().map(String::as_str) == Some(command))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HelperTransport for MockTransport {
    async fn fetch_json(&self, url: &str) -> Option<Value> {
        self.requests.lock().unwrap().push(url.to_string());
        let reply = self
            .json
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        reply
    }

    fn fetch_chunked(&self, url: &str) -> ChunkedFeed {
        self.requests.lock().unwrap().push(url.to_string());
        let script = self.feeds.lock().unwrap().get(url).cloned().unwrap_or_default();
        let (sender, receiver) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            for (delay, value) in script {
                tokio::time::sleep(delay).await;
                if sender.send(value).is_err() {
                    return;
                }
            }
            // Long-lived response: hold the connection open
            std::future::pending::<()>().await;
            drop(sender);
        });

        ChunkedFeed::new(receiver, reader)
    }

    async fn server_request(&self, player_id: &str, command: &[String]) -> Option<Value> {
        self.rpc_calls
            .lock()
            .unwrap()
            .push((player_id.to_string(), command.to_vec()));
        let name = command.first()?;
        let silent = self.rpc_silent.lock().unwrap().contains(name);
        if silent {
            std::future::pending::<()>().await;
        }
        let result = self.rpc_results.lock().unwrap().get(name).cloned();
        result
    }
}
