use crate::protocol::StreamProgress;

/// Running state of one self test, shared by the steps in order.
#[derive(Debug, Clone)]
pub struct TestSession {
    /// Helper base URL ending with '/'
    pub helper_url: String,
    /// Player to stream to, empty when none is connected
    pub player_id: String,

    /// Test track duration in ms
    pub duration_ms: Option<f64>,
    /// Test track nominal sample rate in Hz
    pub sample_rate: Option<f64>,
    /// Samples in the test track
    pub track_len: Option<f64>,
    pub track_uri: Option<String>,
    /// Last instantaneous streaming rate
    pub current_rate: Option<f64>,
}

impl TestSession {
    pub fn new(helper_url: &str, player_id: &str) -> Self {
        Self {
            helper_url: helper_url.to_string(),
            player_id: player_id.to_string(),
            duration_ms: None,
            sample_rate: None,
            track_len: None,
            track_uri: None,
            current_rate: None,
        }
    }

    /// Endpoint on the helper app
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.helper_url, path)
    }

    pub fn has_player(&self) -> bool {
        !self.player_id.is_empty()
    }

    /// Take in one progress object and return the streamed fraction if the
    /// object reported progress.
    ///
    /// Track details are captured the first time they appear. The sample rate
    /// is only taken together with a known duration, as the target length
    /// needs both.
    pub fn absorb(&mut self, progress: &StreamProgress) -> Option<f64> {
        if self.duration_ms.is_none() {
            self.duration_ms = progress.duration();
        }
        if self.track_len.is_none() {
            if let (Some(duration), Some(rate)) = (self.duration_ms, progress.sample_rate()) {
                self.track_len = Some(duration * rate / 1000.0);
                self.sample_rate = Some(rate);
            }
        }
        if self.track_uri.is_none() {
            self.track_uri = progress.uri().map(str::to_string);
        }

        let streamed = progress.streamed()?;
        let len = self.track_len?;
        self.current_rate = progress.rate();
        Some(streamed / len)
    }

    /// Whether `rate` keeps up with the track's sample rate
    pub fn rate_adequate(&self, rate: f64) -> bool {
        self.sample_rate.map_or(false, |nominal| rate > nominal)
    }

    /// Whether the last observed rate kept up before the feed went quiet
    pub fn current_rate_adequate(&self) -> bool {
        self.current_rate.map_or(false, |rate| self.rate_adequate(rate))
    }

    pub fn sample_rate_text(&self) -> String {
        self.sample_rate
            .map(format_rate)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Print a rate without a fractional part when it has none
pub fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 && rate.abs() < 1e15 {
        format!("{}", rate as i64)
    } else {
        format!("{}", rate)
    }
}
