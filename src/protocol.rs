//! Typed views of the helper app and playback server responses.
//!
//! Every payload is decoded once, at the boundary, into a struct whose fields
//! are all optional. The helper omits fields freely and reports "not yet
//! known" as zero, so numeric accessors only return values that are present
//! and non-zero. A stream progress field of the wrong type is dropped on its
//! own instead of discarding the whole object.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// `status.json`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusResponse {
    pub logged_in: bool,
    pub login_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginState {
    LoggedIn,
    NotLoggedIn { error: Option<String> },
}

impl StatusResponse {
    /// Decode a status payload. Anything unreadable counts as "not logged in".
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn login_state(&self) -> LoginState {
        if self.logged_in {
            LoginState::LoggedIn
        } else {
            LoginState::NotLoggedIn {
                error: self.login_error.clone(),
            }
        }
    }
}

/// `toplist.json?q=tracks&r=user`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToplistResponse {
    pub tracks: Vec<Value>,
}

impl ToplistResponse {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }
}

/// One object from a `streamtest.json` feed
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamProgress {
    /// Track duration in ms
    #[serde(deserialize_with = "lenient")]
    pub duration: Option<f64>,
    /// Nominal sample rate in Hz
    #[serde(deserialize_with = "lenient")]
    pub samplerate: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub uri: Option<String>,
    /// Samples streamed so far
    #[serde(deserialize_with = "lenient")]
    pub streamed: Option<f64>,
    /// Instantaneous rate in samples per second
    #[serde(deserialize_with = "lenient")]
    pub rate: Option<f64>,
    /// Average rate over the whole track, sent once streaming completed
    #[serde(deserialize_with = "lenient")]
    pub avgrate: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub state: Option<String>,
    pub timeout: Option<Value>,
    pub bad_player: Option<Value>,
}

/// Decode an optional field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match serde_json::from_value::<Option<T>>(value.clone()) {
        Ok(field) => Ok(field),
        Err(e) => {
            log::warn!("Ignoring stream progress field {}: {}", value, e);
            Ok(None)
        }
    }
}

/// Terminal conditions a progress object can report
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Stream finished with the given average rate
    Completed { avg_rate: f64 },
    /// The player never connected to the helper
    NoPlayer,
    /// The helper refused the player; carries the raw error code
    BadPlayer(String),
}

fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

impl StreamProgress {
    /// Decode a feed object, or `None` when it is not a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            log::debug!("Ignoring non-object stream progress: {}", value);
            return None;
        }
        match serde_json::from_value(value) {
            Ok(progress) => Some(progress),
            Err(e) => {
                log::debug!("Ignoring unreadable stream progress: {}", e);
                None
            }
        }
    }

    pub fn duration(&self) -> Option<f64> {
        present(self.duration)
    }

    pub fn sample_rate(&self) -> Option<f64> {
        present(self.samplerate)
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().filter(|u| !u.is_empty())
    }

    pub fn streamed(&self) -> Option<f64> {
        present(self.streamed)
    }

    pub fn rate(&self) -> Option<f64> {
        present(self.rate)
    }

    pub fn avg_rate(&self) -> Option<f64> {
        present(self.avgrate)
    }

    /// Helper waits for the player to request the track
    pub fn is_waiting(&self) -> bool {
        self.state.as_deref() == Some("waiting")
    }

    /// First terminal condition carried by this object, checked in the order
    /// completion, missing player, rejected player.
    pub fn outcome(&self) -> Option<StreamOutcome> {
        if let Some(avg_rate) = self.avg_rate() {
            return Some(StreamOutcome::Completed { avg_rate });
        }
        if matches!(&self.timeout, Some(Value::String(s)) if s == "no_player") {
            return Some(StreamOutcome::NoPlayer);
        }
        match &self.bad_player {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => None,
            Some(Value::String(s)) => Some(StreamOutcome::BadPlayer(s.clone())),
            Some(other) => Some(StreamOutcome::BadPlayer(other.to_string())),
        }
    }
}

/// `status` query result from the playback server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerStatus {
    pub playlist_loop: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistEntry {
    pub url: Option<String>,
}

impl PlayerStatus {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Whether the first playlist entry is `uri`
    pub fn is_playing_url(&self, uri: &str) -> bool {
        self.playlist_loop
            .first()
            .and_then(|entry| entry.url.as_deref())
            .map_or(false, |url| url == uri)
    }
}
