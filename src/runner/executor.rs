use super::events::{EventEmitter, SelfTestEvent, TITLE_COMPLETE};
use super::session::{format_rate, TestSession};
use super::state::{SelfTestReport, SelfTestState, Step, StepStatus};
use crate::client::rpc::command;
use crate::client::{ChunkedFeed, HelperTransport};
use crate::protocol::{
    LoginState, PlayerStatus, StatusResponse, StreamOutcome, StreamProgress, ToplistResponse,
};
use crate::utils::Config;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

pub const MSG_HELPER_NOT_RUNNING: &str = "Helper App is not running - please check why";
pub const MSG_STREAM_START_FAILED: &str =
    "Unable to start streaming from Spotify - check connectivity to Spotify";
pub const MSG_NO_PLAYER: &str = "Unable to test streaming to player as no player is connected";
pub const MSG_NO_TRACK: &str =
    "Helper app did not report a test track - unable to test streaming to player";
pub const MSG_PLAYER_START_FAILED: &str = "Unable to start streaming to player - check player";
pub const MSG_PLAYER_COULD_NOT_START: &str = "Streaming test could not start.  This is expected if the player is a Touch or Radio and 'Always Stream via Helper' is not set";
pub const MSG_FIREWALL: &str = "Player did not connect to helper app - check your firewall allows the helper app to receive incoming connections from players on the helper app port defined above";
pub const MSG_PLAYBACK_NOT_STARTED: &str = "Playback not started on player";
pub const MSG_ALL_PASSED: &str = "All tests complete - plugin is working correctly";

/// How a step hands over to the rest of the session
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Continue with the next step
    Advance,
    /// End the session, with a summary message when one is given
    Terminate(Option<String>),
    /// The step could not run; end the session with an informational message
    Skip(String),
}

/// Runs the five checks against one helper app
pub struct SelfTestRunner {
    transport: Arc<dyn HelperTransport>,
    config: Config,
    helper_url: String,
    player_id: String,
    events: EventEmitter,
    state: SelfTestState,
    finished: bool,
}

impl SelfTestRunner {
    /// `helper_url` must already be normalized to end with '/'.
    pub fn new(
        transport: Arc<dyn HelperTransport>,
        config: Config,
        helper_url: &str,
        player_id: &str,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        Self {
            transport,
            config,
            helper_url: helper_url.to_string(),
            player_id: player_id.to_string(),
            events: EventEmitter::default(),
            state: SelfTestState::new(&session_id, helper_url, player_id),
            finished: false,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SelfTestEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SelfTestState {
        &self.state
    }

    /// Run every step in order until one ends the session.
    pub async fn run(mut self) -> SelfTestReport {
        self.execute().await;
        self.state.to_report()
    }

    async fn execute(&mut self) {
        let mut session = TestSession::new(&self.helper_url, &self.player_id);

        self.state.start();
        self.events.emit(SelfTestEvent::SessionStarted {
            session_id: self.state.session_id.clone(),
            helper_url: self.helper_url.clone(),
            player_id: self.player_id.clone(),
        });

        for step in Step::ALL {
            let outcome = self.run_step(step, &mut session).await;
            log::debug!("{} -> {:?}", step.label(), outcome);
            match outcome {
                Outcome::Advance => continue,
                Outcome::Terminate(message) => {
                    self.end_tests(message, None);
                    break;
                }
                Outcome::Skip(message) => {
                    self.end_tests(Some(message), None);
                    break;
                }
            }
        }

        self.end_tests(None, None);
    }

    async fn run_step(&mut self, step: Step, session: &mut TestSession) -> Outcome {
        match step {
            Step::Connect => self.connect(session).await,
            Step::Metadata => self.fetch_metadata(session).await,
            Step::Login => self.check_login(session).await,
            Step::StreamLocal => self.stream_local(session).await,
            Step::StreamPlayer => self.stream_to_player(session).await,
        }
    }

    /// Step 1: the helper answers a status request
    async fn connect(&mut self, session: &mut TestSession) -> Outcome {
        let step = Step::Connect;
        self.begin(step);

        let url = session.url("status.json");
        match self.fetch_within(&url, self.config.connect_timeout()).await {
            Some(_) => {
                self.progress(step, Some(1.0), "Helper App Running");
                self.pass(step);
                Outcome::Advance
            }
            None => {
                self.progress(step, Some(1.0), "Helper App Not Running");
                self.fail(step, MSG_HELPER_NOT_RUNNING);
                Outcome::Terminate(Some(MSG_HELPER_NOT_RUNNING.to_string()))
            }
        }
    }

    /// Step 2: the helper can fetch metadata. Failing here does not stop the
    /// session.
    async fn fetch_metadata(&mut self, session: &mut TestSession) -> Outcome {
        let step = Step::Metadata;
        self.begin(step);

        let url = session.url("toplist.json?q=tracks&r=user");
        let transport = Arc::clone(&self.transport);
        let tracks = async move {
            match transport.fetch_json(&url).await.map(ToplistResponse::from_value) {
                Some(toplist) if toplist.has_tracks() => toplist,
                // Without tracks the request does not count as answered
                _ => std::future::pending().await,
            }
        };

        match tokio::time::timeout(self.config.metadata_timeout(), tracks).await {
            Ok(toplist) => {
                log::debug!("Toplist returned {} tracks", toplist.tracks.len());
                self.progress(step, Some(1.0), "Spotify Metadata OK");
                self.pass(step);
            }
            Err(_) => {
                self.progress(step, Some(1.0), "Failed To Receive Metadata");
                self.fail(step, "Failed To Receive Metadata");
            }
        }
        Outcome::Advance
    }

    /// Step 3: the helper is logged in to Spotify
    async fn check_login(&mut self, session: &mut TestSession) -> Outcome {
        let step = Step::Login;
        self.begin(step);

        let url = session.url("status.json");
        let Some(value) = self.fetch_within(&url, self.config.login_timeout()).await else {
            log::info!("No login status from helper app, ending self test");
            return Outcome::Terminate(None);
        };

        match StatusResponse::from_value(value).login_state() {
            LoginState::LoggedIn => {
                self.progress(step, Some(1.0), "Logged In");
                self.pass(step);
                Outcome::Advance
            }
            LoginState::NotLoggedIn { error } => {
                let message = format!(
                    "Unable to log in to Spotify: {}",
                    error.as_deref().unwrap_or("unknown error")
                );
                self.progress(step, Some(1.0), "Not Logged In");
                self.fail(step, &message);
                Outcome::Terminate(Some(message))
            }
        }
    }

    /// Step 4: the helper streams the test track to itself fast enough
    async fn stream_local(&mut self, session: &mut TestSession) -> Outcome {
        let step = Step::StreamLocal;
        self.begin(step);

        let mut feed = self.transport.fetch_chunked(&session.url("streamtest.json"));
        let mut deadline = Instant::now() + self.config.stream_start_timeout();
        let mut receiving = false;

        loop {
            tokio::select! {
                value = feed.next() => {
                    deadline = Instant::now() + self.config.stall_timeout();
                    receiving = true;

                    let Some(progress) = StreamProgress::from_value(value) else {
                        continue;
                    };
                    if let Some(fraction) = session.absorb(&progress) {
                        self.progress(step, Some(fraction), "Streaming from Spotify");
                    }
                    if let Some(avg_rate) = progress.avg_rate() {
                        feed.abort();
                        return self.local_stream_complete(session, avg_rate);
                    }
                }
                _ = sleep_until(deadline) => {
                    feed.abort();
                    if !receiving {
                        self.progress(step, None, "Streaming from Spotify Failed");
                        self.fail(step, MSG_STREAM_START_FAILED);
                        return Outcome::Terminate(Some(MSG_STREAM_START_FAILED.to_string()));
                    }

                    let message = format!(
                        "Streaming from Spotify stalled before end of track, rate {}",
                        rate_word(session.current_rate_adequate())
                    );
                    self.progress(step, None, "Streaming from Spotify Stalled");
                    self.fail(step, &message);
                    return Outcome::Terminate(Some(message));
                }
            }
        }
    }

    fn local_stream_complete(&mut self, session: &TestSession, avg_rate: f64) -> Outcome {
        let step = Step::StreamLocal;
        if session.rate_adequate(avg_rate) {
            self.progress(step, Some(1.0), "Streaming from Spotify OK");
            self.pass(step);
            Outcome::Advance
        } else {
            let message = format!(
                "Streaming rate from Spotify too LOW ({} < {}) - check connectivity to Spotify",
                format_rate(avg_rate),
                session.sample_rate_text()
            );
            self.progress(step, Some(1.0), "Streaming Rate Low");
            self.fail(step, &message);
            Outcome::Terminate(Some(message))
        }
    }

    /// Step 5: the player pulls the test track from the helper fast enough
    async fn stream_to_player(&mut self, session: &mut TestSession) -> Outcome {
        let step = Step::StreamPlayer;
        self.begin(step);

        if !session.has_player() {
            self.progress(step, None, "No Player");
            self.skip(step, MSG_NO_PLAYER);
            return Outcome::Skip(MSG_NO_PLAYER.to_string());
        }
        let Some(uri) = session.track_uri.clone() else {
            self.progress(step, None, "No Test Track");
            self.fail(step, MSG_NO_TRACK);
            return Outcome::Terminate(Some(MSG_NO_TRACK.to_string()));
        };

        let mut feed = self
            .transport
            .fetch_chunked(&session.url(&format!("{}/streamtest.json", uri)));
        let mut deadline = Instant::now() + self.config.stream_start_timeout();
        let mut sent_play = false;
        // The stall timer only takes over from the start timer once play was sent
        let mut stall_armed = false;

        loop {
            tokio::select! {
                value = feed.next() => {
                    if sent_play {
                        deadline = Instant::now() + self.config.stall_timeout();
                        stall_armed = true;
                    }

                    let Some(progress) = StreamProgress::from_value(value) else {
                        continue;
                    };

                    if progress.is_waiting() {
                        self.send_play(&session.player_id, &uri);
                        sent_play = true;
                        session.current_rate = Some(0.0);
                    }
                    if let Some(fraction) = session.absorb(&progress) {
                        self.progress(step, Some(fraction), "Streaming To Player");
                    }

                    if let Some(outcome) = progress.outcome() {
                        feed.abort();
                        return self.player_stream_outcome(session, &uri, outcome).await;
                    }
                }
                _ = sleep_until(deadline) => {
                    feed.abort();
                    return self.player_stream_timed_out(session, stall_armed);
                }
            }
        }
    }

    fn player_stream_timed_out(&mut self, session: &TestSession, stall_armed: bool) -> Outcome {
        let step = Step::StreamPlayer;

        if !stall_armed {
            self.progress(step, None, "Streaming to player Failed");
            self.fail(step, MSG_PLAYER_START_FAILED);
            return Outcome::Terminate(Some(MSG_PLAYER_START_FAILED.to_string()));
        }

        if session.current_rate.map_or(false, |rate| rate > 0.0) {
            let message = format!(
                "Streaming to player stalled before end of track, rate {}",
                rate_word(session.current_rate_adequate())
            );
            self.progress(step, None, "Streaming to player Stalled");
            self.fail(step, &message);
            Outcome::Terminate(Some(message))
        } else {
            // No verdict: some players never stream through the helper
            self.progress(step, None, "Unable to stream to player");
            self.skip(step, MSG_PLAYER_COULD_NOT_START);
            Outcome::Terminate(Some(MSG_PLAYER_COULD_NOT_START.to_string()))
        }
    }

    async fn player_stream_outcome(
        &mut self,
        session: &TestSession,
        uri: &str,
        outcome: StreamOutcome,
    ) -> Outcome {
        let step = Step::StreamPlayer;
        match outcome {
            StreamOutcome::Completed { avg_rate } => {
                if session.rate_adequate(avg_rate) {
                    self.progress(step, Some(1.0), "Streaming to Player OK");
                    self.pass(step);
                    Outcome::Terminate(Some(MSG_ALL_PASSED.to_string()))
                } else {
                    let message = format!(
                        "Streaming rate to player too LOW ({} < {}) - check your local network is able to playback Flac files without audio stuttering",
                        format_rate(avg_rate),
                        session.sample_rate_text()
                    );
                    self.progress(step, Some(1.0), "Streaming to Player Rate Low");
                    self.fail(step, &message);
                    Outcome::Terminate(Some(message))
                }
            }
            StreamOutcome::NoPlayer => {
                self.progress(step, Some(0.0), "Player Unable to Connect");
                let message = if self.player_loaded_track(&session.player_id, uri).await {
                    // The player tried to play our track but never reached the helper
                    MSG_FIREWALL
                } else {
                    MSG_PLAYBACK_NOT_STARTED
                };
                self.fail(step, message);
                Outcome::Terminate(Some(message.to_string()))
            }
            StreamOutcome::BadPlayer(error) => {
                let message = format!(
                    "Helper app unable to authenticate player (error: {})",
                    error
                );
                self.progress(step, Some(0.0), "Unable to authenticate player");
                self.fail(step, &message);
                Outcome::Terminate(Some(message))
            }
        }
    }

    /// Ask the playback server whether the player's playlist holds `uri`
    async fn player_loaded_track(&self, player_id: &str, uri: &str) -> bool {
        let status_command = command(&["status", "-", "1", "tags:uB"]);
        let reply = tokio::time::timeout(
            self.config.rpc_timeout(),
            self.transport.server_request(player_id, &status_command),
        )
        .await;

        match reply {
            Ok(Some(result)) => PlayerStatus::from_value(result).is_playing_url(uri),
            Ok(None) => false,
            Err(_) => {
                log::debug!("Player status query timed out");
                false
            }
        }
    }

    /// Tell the player to start the test track; nobody waits for the reply
    fn send_play(&self, player_id: &str, uri: &str) {
        log::info!("Helper waiting, asking player {} to play {}", player_id, uri);
        let transport = Arc::clone(&self.transport);
        let player_id = player_id.to_string();
        let play_command = command(&["playlist", "play", uri]);
        tokio::spawn(async move {
            transport.server_request(&player_id, &play_command).await;
        });
    }

    /// Wait up to `limit` for a JSON reply. Requests that fail or return
    /// garbage never count as a reply.
    async fn fetch_within(&self, url: &str, limit: Duration) -> Option<Value> {
        let reply = async {
            match self.transport.fetch_json(url).await {
                Some(value) => value,
                None => std::future::pending().await,
            }
        };
        tokio::time::timeout(limit, reply).await.ok()
    }

    fn begin(&mut self, step: Step) {
        log::info!("Self test step: {}", step.label());
        self.state.step_mut(step).start();
        self.events.emit(SelfTestEvent::StepStarted { step });
    }

    fn progress(&mut self, step: Step, fraction: Option<f64>, text: &str) {
        self.state.step_mut(step).detail = Some(text.to_string());
        self.events.emit(SelfTestEvent::StepProgress {
            step,
            fraction,
            text: text.to_string(),
        });
    }

    fn pass(&mut self, step: Step) {
        self.state.step_mut(step).pass();
        self.finished_step(step);
    }

    fn fail(&mut self, step: Step, reason: &str) {
        log::info!("{} failed: {}", step.label(), reason);
        self.state.step_mut(step).fail(reason.to_string());
        self.finished_step(step);
    }

    fn skip(&mut self, step: Step, reason: &str) {
        self.state.step_mut(step).skip(reason.to_string());
        self.finished_step(step);
    }

    fn finished_step(&self, step: Step) {
        self.events.emit(SelfTestEvent::StepFinished {
            step,
            status: self.state.step(step).status.clone(),
        });
    }

    /// End the session: final title, optional summary message, in-flight feed
    /// aborted. Later calls only abort the feed they are given.
    pub fn end_tests(&mut self, message: Option<String>, feed: Option<&mut ChunkedFeed>) {
        if let Some(feed) = feed {
            feed.abort();
        }
        if self.finished {
            return;
        }
        self.finished = true;

        let message = message.filter(|m| !m.is_empty());
        self.state.finish(message.clone());
        for step in &self.state.steps {
            if step.status == StepStatus::Aborted {
                log::debug!("{} ended without a verdict", step.step.label());
            }
        }

        self.events.emit(SelfTestEvent::SessionFinished {
            title: TITLE_COMPLETE.to_string(),
            message,
            summary: self.state.summary(),
        });
    }
}

fn rate_word(adequate: bool) -> &'static str {
    if adequate {
        "OK"
    } else {
        "LOW"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::broadcast;

    const HELPER: &str = "http://helper/";
    const STATUS: &str = "http://helper/status.json";
    const TOPLIST: &str = "http://helper/toplist.json?q=tracks&r=user";
    const STREAMTEST: &str = "http://helper/streamtest.json";
    const TRACK: &str = "spotify:track:4uLU6hMCjMI75M1A2tKUQC";
    const PLAYER_STREAMTEST: &str =
        "http://helper/spotify:track:4uLU6hMCjMI75M1A2tKUQC/streamtest.json";
    const PLAYER: &str = "00:04:20:12:34:56";

    fn logged_in() -> Value {
        json!({"logged_in": true})
    }

    fn toplist() -> Value {
        json!({"tracks": [{"uri": TRACK, "name": "Test"}]})
    }

    /// A clean local stream of a 2s track at 44.1kHz
    fn local_feed(avgrate: u64) -> Vec<(u64, Value)> {
        vec![
            (100, json!({"duration": 2000, "samplerate": 44100, "uri": TRACK})),
            (100, json!({"streamed": 44100, "rate": 90000})),
            (100, json!({"streamed": 88200, "rate": 90000})),
            (100, json!({"avgrate": avgrate})),
        ]
    }

    fn healthy_helper() -> MockTransport {
        MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in())
            .feed(STREAMTEST, local_feed(90000))
    }

    async fn run(
        transport: MockTransport,
        player: &str,
    ) -> (SelfTestReport, Vec<SelfTestEvent>, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let runner = SelfTestRunner::new(transport.clone(), Config::default(), HELPER, player);
        let mut receiver = runner.subscribe();
        let report = runner.run().await;
        tokio::task::yield_now().await;
        (report, drain(&mut receiver), transport)
    }

    fn drain(receiver: &mut broadcast::Receiver<SelfTestEvent>) -> Vec<SelfTestEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn status(report: &SelfTestReport, step: Step) -> StepStatus {
        report.step(step).unwrap().status.clone()
    }

    fn failed(reason: &str) -> StepStatus {
        StepStatus::Failed {
            reason: reason.to_string(),
        }
    }

    fn finished_count(events: &[SelfTestEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SelfTestEvent::SessionFinished { .. }))
            .count()
    }

    fn progress_texts(events: &[SelfTestEvent], step: Step) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SelfTestEvent::StepProgress { step: s, text, .. } if *s == step => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_steps_pass() {
        let transport = healthy_helper()
            .feed(
                PLAYER_STREAMTEST,
                vec![
                    (100, json!({"state": "waiting"})),
                    (100, json!({"streamed": 44100, "rate": 60000})),
                    (100, json!({"avgrate": 60000})),
                ],
            )
            .rpc("playlist", json!({}));

        let (report, events, transport) = run(transport, PLAYER).await;

        for step in Step::ALL {
            assert_eq!(status(&report, step), StepStatus::Passed, "{:?}", step);
        }
        assert_eq!(report.summary.message.as_deref(), Some(MSG_ALL_PASSED));
        assert!(report.summary.is_success());
        assert_eq!(finished_count(&events), 1);

        let plays = transport.calls_to("playlist");
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].0, PLAYER);
        assert_eq!(plays[0].1, command(&["playlist", "play", TRACK]));
        assert_eq!(
            transport.requested(),
            vec![STATUS, TOPLIST, STATUS, STREAMTEST, PLAYER_STREAMTEST]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_helper_not_running() {
        let started = Instant::now();
        let (report, events, transport) = run(MockTransport::new(), PLAYER).await;

        assert_eq!(status(&report, Step::Connect), failed(MSG_HELPER_NOT_RUNNING));
        assert_eq!(status(&report, Step::Metadata), StepStatus::Pending);
        assert_eq!(report.summary.message.as_deref(), Some(MSG_HELPER_NOT_RUNNING));
        assert_eq!(transport.requested(), vec![STATUS]);
        assert_eq!(finished_count(&events), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_failure_is_not_fatal() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, json!({"tracks": []}))
            .json(STATUS, logged_in())
            .feed(STREAMTEST, local_feed(90000));

        let (report, events, _) = run(transport, "").await;

        assert_eq!(
            status(&report, Step::Metadata),
            failed("Failed To Receive Metadata")
        );
        assert_eq!(status(&report, Step::Login), StepStatus::Passed);
        assert_eq!(status(&report, Step::StreamLocal), StepStatus::Passed);
        assert_eq!(
            progress_texts(&events, Step::Metadata),
            vec!["Failed To Receive Metadata"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_logged_in() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(
                STATUS,
                json!({"logged_in": false, "login_error": "Bad username or password"}),
            );

        let (report, _, transport) = run(transport, PLAYER).await;

        let message = "Unable to log in to Spotify: Bad username or password";
        assert_eq!(status(&report, Step::Login), failed(message));
        assert_eq!(report.summary.message.as_deref(), Some(message));
        assert!(!transport.requested().contains(&STREAMTEST.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout_ends_silently() {
        // Second status request never answers
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist());

        let (report, events, _) = run(transport, PLAYER).await;

        assert_eq!(status(&report, Step::Login), StepStatus::Aborted);
        assert_eq!(report.summary.message, None);
        assert_eq!(report.summary.failed, 0);
        assert!(!report.summary.is_success());
        match events.last() {
            Some(SelfTestEvent::SessionFinished { title, message, .. }) => {
                assert_eq!(title, TITLE_COMPLETE);
                assert_eq!(*message, None);
            }
            other => panic!("unexpected last event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stream_rate_low() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in())
            .feed(STREAMTEST, local_feed(40000));

        let (report, _, _) = run(transport, PLAYER).await;

        let message =
            "Streaming rate from Spotify too LOW (40000 < 44100) - check connectivity to Spotify";
        assert_eq!(status(&report, Step::StreamLocal), failed(message));
        assert_eq!(report.summary.message.as_deref(), Some(message));
        assert_eq!(status(&report, Step::StreamPlayer), StepStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stream_never_starts() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in());

        let (report, events, _) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamLocal),
            failed(MSG_STREAM_START_FAILED)
        );
        assert_eq!(
            progress_texts(&events, Step::StreamLocal),
            vec!["Streaming from Spotify Failed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stream_stall_rate_ok() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in())
            .feed(
                STREAMTEST,
                vec![
                    (100, json!({"duration": 2000, "samplerate": 44100, "uri": TRACK})),
                    (100, json!({"streamed": 44100, "rate": 90000})),
                ],
            );

        let (report, events, _) = run(transport, PLAYER).await;

        let message = "Streaming from Spotify stalled before end of track, rate OK";
        assert_eq!(status(&report, Step::StreamLocal), failed(message));
        assert_eq!(report.summary.message.as_deref(), Some(message));
        assert_eq!(
            progress_texts(&events, Step::StreamLocal),
            vec!["Streaming from Spotify", "Streaming from Spotify Stalled"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stream_stall_rate_low() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in())
            .feed(
                STREAMTEST,
                vec![
                    (100, json!({"duration": 2000, "samplerate": 44100, "uri": TRACK})),
                    (100, json!({"streamed": 4410, "rate": 20000})),
                ],
            );

        let (report, _, _) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamLocal),
            failed("Streaming from Spotify stalled before end of track, rate LOW")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_fraction_reported() {
        let (_, events, _) = run(healthy_helper(), "").await;

        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                SelfTestEvent::StepProgress {
                    step: Step::StreamLocal,
                    fraction: Some(f),
                    ..
                } => Some(*f),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.5, 1.0, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_player_skips_player_step() {
        let (report, events, transport) = run(healthy_helper(), "").await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            StepStatus::Skipped {
                reason: MSG_NO_PLAYER.to_string()
            }
        );
        assert_eq!(report.summary.message.as_deref(), Some(MSG_NO_PLAYER));
        assert!(report.summary.is_success());
        assert_eq!(
            transport.requested(),
            vec![STATUS, TOPLIST, STATUS, STREAMTEST]
        );
        assert!(transport.rpc_calls.lock().unwrap().is_empty());
        assert_eq!(progress_texts(&events, Step::StreamPlayer), vec!["No Player"]);
    }

    fn player_no_show(playlist_url: &str) -> MockTransport {
        healthy_helper()
            .feed(
                PLAYER_STREAMTEST,
                vec![
                    (100, json!({"state": "waiting"})),
                    (100, json!({"timeout": "no_player"})),
                ],
            )
            .rpc(
                "status",
                json!({"playlist_loop": [{"url": playlist_url, "title": "Test"}]}),
            )
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_never_connects_firewall() {
        let (report, events, transport) = run(player_no_show(TRACK), PLAYER).await;

        assert_eq!(status(&report, Step::StreamPlayer), failed(MSG_FIREWALL));
        assert_eq!(report.summary.message.as_deref(), Some(MSG_FIREWALL));
        let queries = transport.calls_to("status");
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].1, command(&["status", "-", "1", "tags:uB"]));
        assert_eq!(
            progress_texts(&events, Step::StreamPlayer),
            vec!["Player Unable to Connect"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_never_connects_playback_not_started() {
        let (report, _, transport) =
            run(player_no_show("file:///music/other.flac"), PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            failed(MSG_PLAYBACK_NOT_STARTED)
        );
        assert_eq!(transport.calls_to("status").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_status_without_result() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![
                (100, json!({"state": "waiting"})),
                (100, json!({"timeout": "no_player"})),
            ],
        );

        let (report, _, transport) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            failed(MSG_PLAYBACK_NOT_STARTED)
        );
        assert_eq!(transport.calls_to("status").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_status_query_times_out() {
        let transport = healthy_helper()
            .feed(
                PLAYER_STREAMTEST,
                vec![
                    (100, json!({"state": "waiting"})),
                    (100, json!({"timeout": "no_player"})),
                ],
            )
            .rpc("status", json!({"playlist_loop": [{"url": TRACK}]}))
            .rpc_silent("status");

        let started = Instant::now();
        let (report, events, transport) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            failed(MSG_PLAYBACK_NOT_STARTED)
        );
        assert_eq!(report.summary.message.as_deref(), Some(MSG_PLAYBACK_NOT_STARTED));
        assert_eq!(transport.calls_to("status").len(), 1);
        assert_eq!(finished_count(&events), 1);
        assert!(started.elapsed() >= Config::default().rpc_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_track_uri_fails_player_step() {
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in())
            .feed(
                STREAMTEST,
                vec![
                    (100, json!({"duration": 2000, "samplerate": 44100})),
                    (100, json!({"streamed": 88200, "rate": 90000})),
                    (100, json!({"avgrate": 90000})),
                ],
            );

        let (report, events, transport) = run(transport, PLAYER).await;

        assert_eq!(status(&report, Step::StreamLocal), StepStatus::Passed);
        assert_eq!(status(&report, Step::StreamPlayer), failed(MSG_NO_TRACK));
        assert_eq!(report.summary.message.as_deref(), Some(MSG_NO_TRACK));
        assert_eq!(
            transport.requested(),
            vec![STATUS, TOPLIST, STATUS, STREAMTEST]
        );
        assert!(transport.rpc_calls.lock().unwrap().is_empty());
        assert_eq!(
            progress_texts(&events, Step::StreamPlayer),
            vec!["No Test Track"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_player() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![
                (100, json!({"state": "waiting"})),
                (100, json!({"bad_player": 403})),
            ],
        );

        let (report, _, _) = run(transport, PLAYER).await;

        let message = "Helper app unable to authenticate player (error: 403)";
        assert_eq!(status(&report, Step::StreamPlayer), failed(message));
        assert_eq!(report.summary.message.as_deref(), Some(message));
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_rate_low() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![
                (100, json!({"state": "waiting"})),
                (100, json!({"streamed": 22050, "rate": 30000})),
                (100, json!({"avgrate": 30000.5})),
            ],
        );

        let (report, _, _) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            failed("Streaming rate to player too LOW (30000.5 < 44100) - check your local network is able to playback Flac files without audio stuttering")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_never_waits() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![(100, json!({"duration": 2000}))],
        );

        let started = Instant::now();
        let (report, _, transport) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            failed(MSG_PLAYER_START_FAILED)
        );
        assert!(transport.calls_to("playlist").is_empty());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_stalls_after_streaming() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![
                (100, json!({"state": "waiting"})),
                (100, json!({"streamed": 22050, "rate": 20000})),
            ],
        );

        let (report, _, _) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            failed("Streaming to player stalled before end of track, rate LOW")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_stalls_with_good_rate() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![
                (100, json!({"state": "waiting"})),
                (100, json!({"streamed": 22050, "rate": 60000})),
            ],
        );

        let (report, events, _) = run(transport, PLAYER).await;

        let message = "Streaming to player stalled before end of track, rate OK";
        assert_eq!(status(&report, Step::StreamPlayer), failed(message));
        assert_eq!(report.summary.message.as_deref(), Some(message));
        assert_eq!(
            progress_texts(&events, Step::StreamPlayer),
            vec!["Streaming To Player", "Streaming to player Stalled"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_could_not_start_streaming() {
        let transport = healthy_helper().feed(
            PLAYER_STREAMTEST,
            vec![
                (100, json!({"state": "waiting"})),
                (100, json!({"state": "connecting"})),
            ],
        );

        let (report, events, _) = run(transport, PLAYER).await;

        assert_eq!(
            status(&report, Step::StreamPlayer),
            StepStatus::Skipped {
                reason: MSG_PLAYER_COULD_NOT_START.to_string()
            }
        );
        assert_eq!(
            report.summary.message.as_deref(),
            Some(MSG_PLAYER_COULD_NOT_START)
        );
        assert_eq!(
            progress_texts(&events, Step::StreamPlayer),
            vec!["Unable to stream to player"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_chunks_are_ignored() {
        // Values after the completion marker must not reach the runner
        let mut feed = local_feed(90000);
        feed.push((100, json!({"streamed": 1, "rate": 1})));
        feed.push((100, json!({"avgrate": 1})));
        let transport = MockTransport::new()
            .json(STATUS, logged_in())
            .json(TOPLIST, toplist())
            .json(STATUS, logged_in())
            .feed(STREAMTEST, feed);

        let (report, events, _) = run(transport, "").await;

        assert_eq!(status(&report, Step::StreamLocal), StepStatus::Passed);
        assert_eq!(
            progress_texts(&events, Step::StreamLocal).last().map(String::as_str),
            Some("Streaming from Spotify OK")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_tests_is_idempotent() {
        let transport: Arc<dyn HelperTransport> = Arc::new(MockTransport::new());
        let mut runner = SelfTestRunner::new(transport.clone(), Config::default(), HELPER, "");
        let mut receiver = runner.subscribe();
        let mut feed = transport.fetch_chunked(STREAMTEST);

        runner.end_tests(Some("first".to_string()), Some(&mut feed));
        runner.end_tests(Some("second".to_string()), Some(&mut feed));
        runner.end_tests(None, None);

        let events = drain(&mut receiver);
        assert_eq!(finished_count(&events), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(runner.state().message.as_deref(), Some("first"));
        assert!(feed.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_step_settles_once() {
        let (_, events, _) = run(player_no_show(TRACK), PLAYER).await;

        for step in Step::ALL {
            let finished = events
                .iter()
                .filter(|e| matches!(e, SelfTestEvent::StepFinished { step: s, .. } if *s == step))
                .count();
            assert_eq!(finished, 1, "{:?}", step);
        }
        assert_eq!(finished_count(&events), 1);
    }
}
