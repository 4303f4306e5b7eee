//! # Session Lifecycle Management
//!
//! Owns every resource of one live interview: the playback scheduler, the
//! frame accumulator, the duplex agent channel, the event-dispatch and
//! speaking-forwarder tasks, and the transcript. Nothing else holds an
//! independent reference allowed to outlive teardown.
//!
//! ## Lifecycle:
//! `Idle → Initializing → Connected → (Evaluating | Errored)`
//!
//! Initialization acquires collaborators in order (token + research, then
//! the channel, then the pipeline tasks); failure at any step releases
//! whatever was already acquired and lands in `Errored` — no partial
//! session ever accepts audio.
//!
//! ## Teardown:
//! Guarded by an atomic flag and entirely synchronous, so it is safe to
//! invoke from the user's end action, the agent's close event, and the
//! browser socket dropping — in any order, any number of times.

use crate::agent::channel::AgentChannel;
use crate::agent::events::AgentEvent;
use crate::agent::generate::{Evaluation, EvaluationRequest, GenerateClient};
use crate::agent::prompt;
use crate::audio::accumulator::FrameAccumulator;
use crate::audio::codec;
use crate::audio::playback::{PlaybackChunk, PlaybackConfig, PlaybackScheduler, PlaybackSink};
use crate::config::{AgentConfig, AudioConfig};
use crate::error::{AppError, AppResult};
use crate::interview::transcript::{TranscriptAssembler, TranscriptEntry};
use crate::interview::turn::TurnMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration of one interview, as created on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSpec {
    pub job_role: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub difficulty: String,
    pub num_questions: u32,
    #[serde(default)]
    pub interview_round: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub jd_text: Option<String>,
}

/// Where the session currently is. Transitions are owned exclusively by the
/// lifecycle manager; other components only read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Connected,
    Evaluating,
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Connected => "connected",
            SessionState::Evaluating => "evaluating",
            SessionState::Errored => "errored",
        }
    }
}

/// Everything the session pushes back to the browser client. Implemented by
/// the WebSocket actor in production and by stubs in tests.
pub trait ClientPort: Send + Sync {
    fn deliver_audio(&self, chunk: &PlaybackChunk);
    fn speaking_changed(&self, active: bool);
    fn state_changed(&self, state: SessionState, detail: Option<String>);
    fn transcript_committed(&self, entry: &TranscriptEntry);
    /// The agent side closed or failed; the session is already torn down.
    fn session_closed(&self, reason: &str);
}

/// Adapts the client port to the scheduler's sink seam.
struct PortSink(Arc<dyn ClientPort>);

impl PlaybackSink for PortSink {
    fn deliver(&self, chunk: &PlaybackChunk) {
        self.0.deliver_audio(chunk);
    }
}

/// One live (or just-ended) interview session and all of its resources.
pub struct InterviewSession {
    pub session_id: String,
    pub interview_id: String,
    pub candidate_name: String,
    pub spec: InterviewSpec,

    /// Sample rate the browser reported for its capture frames
    capture_rate: u32,
    audio: AudioConfig,

    state: RwLock<SessionState>,
    port: Arc<dyn ClientPort>,
    scheduler: Arc<PlaybackScheduler>,
    accumulator: Mutex<FrameAccumulator>,
    channel: RwLock<Option<AgentChannel>>,
    transcript: Arc<Mutex<TranscriptAssembler>>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    torn_down: AtomicBool,
    mic_live: AtomicBool,

    created_at: DateTime<Utc>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
}

impl InterviewSession {
    /// Build a session in `Idle`. No resource is acquired until
    /// [`InterviewSession::connect`]. The caller mints the session id so it
    /// can address client notices before construction completes.
    pub fn new(
        session_id: String,
        interview_id: String,
        candidate_name: String,
        spec: InterviewSpec,
        capture_rate: u32,
        port: Arc<dyn ClientPort>,
        audio: AudioConfig,
    ) -> Arc<Self> {
        let scheduler = PlaybackScheduler::new(
            Arc::new(PortSink(Arc::clone(&port))),
            PlaybackConfig {
                sample_rate: audio.playback_rate,
                drain_poll: Duration::from_millis(audio.drain_poll_ms),
            },
        );
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            session_id,
            interview_id,
            candidate_name,
            capture_rate,
            accumulator: Mutex::new(FrameAccumulator::new(audio.send_unit_samples)),
            audio,
            spec,
            state: RwLock::new(SessionState::Idle),
            port,
            scheduler,
            channel: RwLock::new(None),
            transcript: Arc::new(Mutex::new(TranscriptAssembler::new())),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            torn_down: AtomicBool::new(false),
            mic_live: AtomicBool::new(true),
            created_at: Utc::now(),
            connected_at: RwLock::new(None),
            ended_at: RwLock::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Acquire everything and go live: mint the channel credential and fetch
    /// company research concurrently, build the interviewer instruction,
    /// open the duplex channel, then start the pipeline tasks.
    ///
    /// Research failure is recovered locally (empty context); every other
    /// failure releases acquired resources and lands in `Errored`.
    pub async fn connect(
        self: &Arc<Self>,
        generate: &GenerateClient,
        agent: &AgentConfig,
    ) -> AppResult<()> {
        if self.state() != SessionState::Idle {
            return Err(AppError::BadRequest(
                "session was already started".to_string(),
            ));
        }
        self.transition(SessionState::Initializing, None);

        let (token, research) = tokio::join!(
            generate.mint_session_token(),
            generate.research_company(&self.spec)
        );

        let token = match token {
            Ok(token) => token,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };

        let research = research.unwrap_or_else(|err| {
            debug!(error = %err, "company research unavailable, continuing without");
            String::new()
        });

        let instruction = prompt::build_system_instruction(&self.spec, &self.candidate_name, &research);

        let (channel, event_rx) = match AgentChannel::connect(agent, &token, &instruction).await {
            Ok(pair) => pair,
            Err(err) => {
                let err = AppError::Upstream(err.to_string());
                self.fail(&err);
                return Err(err);
            }
        };
        *self.channel.write().unwrap() = Some(channel);

        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(self.scheduler.spawn_driver());
            tasks.push(self.spawn_speaking_forwarder());
        }
        self.spawn_event_loop(event_rx);

        *self.connected_at.write().unwrap() = Some(Utc::now());
        self.transition(SessionState::Connected, None);
        info!(
            session_id = %self.session_id,
            interview_id = %self.interview_id,
            role = %self.spec.job_role,
            "interview session connected"
        );
        Ok(())
    }

    /// Feed one browser capture frame into the outbound pipeline. Complete
    /// send units are encoded and queued for the channel; anything short of
    /// the threshold stays pending. Cheap and non-blocking, called per
    /// capture callback.
    pub fn push_frames(&self, samples: &[f32]) {
        if !self.mic_live.load(Ordering::SeqCst) || self.state() != SessionState::Connected {
            return;
        }

        let units = self.accumulator.lock().unwrap().push(samples);
        if units.is_empty() {
            return;
        }

        let channel = self.channel.read().unwrap();
        let Some(channel) = channel.as_ref() else {
            return;
        };
        for unit in units {
            let packet = codec::encode_send_unit(&unit, self.capture_rate);
            if let Err(err) = channel.send_audio(packet) {
                // The channel is going down; the event loop will tear us down.
                warn!(error = %err, "dropping send unit on closing channel");
                return;
            }
        }
    }

    /// Mute/unmute the candidate's microphone path.
    pub fn set_mic(&self, active: bool) {
        self.mic_live.store(active, Ordering::SeqCst);
        debug!(session_id = %self.session_id, active, "microphone state changed");
    }

    /// User-initiated end: tear down and move to `Evaluating`. Returns false
    /// when the session had already ended.
    pub fn end(&self) -> bool {
        if self.teardown() {
            self.transition(SessionState::Evaluating, None);
            true
        } else {
            false
        }
    }

    /// Release every acquired resource: stop playback, close the channel,
    /// abort pipeline tasks, clear pending audio, freeze the transcript.
    ///
    /// Idempotent and synchronous. Returns true only for the call that
    /// actually performed the teardown.
    pub fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        let _ = self.shutdown_tx.send(true);
        self.scheduler.stop();
        if let Some(channel) = self.channel.write().unwrap().take() {
            channel.close();
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        {
            let mut accumulator = self.accumulator.lock().unwrap();
            if accumulator.pending_len() > 0 {
                debug!(
                    pending_samples = accumulator.pending_len(),
                    "discarding partial send unit"
                );
            }
            accumulator.reset();
        }
        self.transcript.lock().unwrap().finish();
        *self.ended_at.write().unwrap() = Some(Utc::now());

        info!(session_id = %self.session_id, "interview session torn down");
        true
    }

    /// The frozen transcript, retained after teardown so evaluation can be
    /// retried without re-running the interview.
    pub fn transcript_snapshot(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().unwrap().snapshot()
    }

    /// Whether the agent's speech is currently audible (always false once
    /// the session has ended).
    pub fn is_speaking(&self) -> bool {
        self.scheduler.is_speaking()
    }

    /// Wall-clock seconds the candidate spent connected.
    pub fn duration_seconds(&self) -> u64 {
        let Some(connected) = *self.connected_at.read().unwrap() else {
            return 0;
        };
        let end = self.ended_at.read().unwrap().unwrap_or_else(Utc::now);
        end.signed_duration_since(connected).num_seconds().max(0) as u64
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.read().unwrap()
    }

    fn transition(&self, state: SessionState, detail: Option<String>) {
        *self.state.write().unwrap() = state;
        self.port.state_changed(state, detail);
    }

    fn fail(&self, err: &AppError) {
        self.teardown();
        self.transition(SessionState::Errored, Some(err.to_string()));
    }

    fn spawn_speaking_forwarder(self: &Arc<Self>) -> JoinHandle<()> {
        let mut speaking = self.scheduler.speaking();
        let port = Arc::clone(&self.port);
        tokio::spawn(async move {
            while speaking.changed().await.is_ok() {
                let active = *speaking.borrow_and_update();
                port.speaking_changed(active);
            }
        })
    }

    /// The single event-dispatch loop: every inbound agent event flows
    /// through one `TurnMachine` owned by this task. Terminal events tear
    /// the session down; the loop also exits promptly when teardown is
    /// requested from elsewhere.
    fn spawn_event_loop(
        self: &Arc<Self>,
        mut event_rx: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>,
    ) {
        let session = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut machine = TurnMachine::new(
                Arc::clone(&session.scheduler),
                Arc::clone(&session.transcript),
                &session.audio,
            );

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    maybe_event = event_rx.recv() => {
                        let Some(event) = maybe_event else { break };
                        match event {
                            AgentEvent::Closed { reason } => {
                                if session.teardown() {
                                    session.transition(SessionState::Errored, Some(reason.clone()));
                                    session.port.session_closed(&reason);
                                }
                                break;
                            }
                            AgentEvent::Error(message) => {
                                if session.teardown() {
                                    session.transition(SessionState::Errored, Some(message.clone()));
                                    session.port.session_closed(&message);
                                }
                                break;
                            }
                            event => {
                                if let Some(entry) = machine.handle_event(event) {
                                    session.port.transcript_committed(&entry);
                                }
                                tracing::trace!(phase = ?machine.phase(), "agent event handled");
                            }
                        }
                    }
                }
            }
            debug!(session_id = %session.session_id, "event loop ended");
        });
    }
}

/// Score an ended session's transcript. Shared by the in-band end flow and
/// the HTTP retry endpoint.
pub async fn evaluate_session(
    session: &InterviewSession,
    generate: &GenerateClient,
) -> AppResult<Evaluation> {
    if !session.is_torn_down() {
        return Err(AppError::BadRequest(
            "interview is still in progress".to_string(),
        ));
    }

    let transcript = session.transcript_snapshot();
    let request = EvaluationRequest {
        interview_id: &session.interview_id,
        transcript: &transcript,
        job_role: &session.spec.job_role,
        num_questions: session.spec.num_questions,
        company_name: session.spec.company_name.as_deref(),
        jd_text: session.spec.jd_text.as_deref(),
        duration_seconds: session.duration_seconds(),
    };
    generate.evaluate_transcript(&request).await
}

/// Tracks live and recently-ended sessions, enforcing the concurrency cap.
/// Ended sessions are retained for a bounded window so evaluation can be
/// retried over HTTP after the socket is gone.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<InterviewSession>>>,
    max_sessions: usize,
}

/// How long ended sessions stay available for evaluation retries.
const RETENTION_SECS: i64 = 3600;

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new session, reaping expired ones first.
    pub fn insert(&self, session: Arc<InterviewSession>) -> AppResult<()> {
        self.cleanup_expired();

        let mut sessions = self.sessions.write().unwrap();
        if sessions.len() >= self.max_sessions {
            return Err(AppError::ValidationError(format!(
                "maximum concurrent sessions ({}) reached",
                self.max_sessions
            )));
        }
        if sessions.contains_key(&session.session_id) {
            return Err(AppError::Internal(format!(
                "session id collision: {}",
                session.session_id
            )));
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<InterviewSession>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }

    /// Drop ended sessions past the retention window.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().unwrap();
        sessions.retain(|_, session| match session.ended_at() {
            Some(ended) => now.signed_duration_since(ended).num_seconds() < RETENTION_SECS,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Port that records state transitions and counts callbacks.
    #[derive(Default)]
    struct StubPort {
        states: Mutex<Vec<SessionState>>,
        closed: AtomicBool,
    }

    impl ClientPort for StubPort {
        fn deliver_audio(&self, _chunk: &PlaybackChunk) {}
        fn speaking_changed(&self, _active: bool) {}
        fn state_changed(&self, state: SessionState, _detail: Option<String>) {
            self.states.lock().unwrap().push(state);
        }
        fn transcript_committed(&self, _entry: &TranscriptEntry) {}
        fn session_closed(&self, _reason: &str) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn spec() -> InterviewSpec {
        InterviewSpec {
            job_role: "Backend Engineer".to_string(),
            company_name: None,
            difficulty: "medium".to_string(),
            num_questions: 5,
            interview_round: None,
            language: None,
            jd_text: None,
        }
    }

    fn session_with_port() -> (Arc<InterviewSession>, Arc<StubPort>) {
        let port = Arc::new(StubPort::default());
        let session = InterviewSession::new(
            uuid::Uuid::new_v4().to_string(),
            "interview-1".to_string(),
            "Jordan".to_string(),
            spec(),
            16_000,
            port.clone() as Arc<dyn ClientPort>,
            crate::config::AppConfig::default().audio,
        );
        (session, port)
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (session, _port) = session_with_port();

        assert!(session.teardown());
        assert!(session.is_torn_down());
        assert!(session.ended_at().is_some());
        assert!(!session.is_speaking());

        // Redundant teardown must not throw or re-run
        assert!(!session.teardown());
        assert!(!session.teardown());
    }

    #[tokio::test]
    async fn test_end_moves_to_evaluating_once() {
        let (session, port) = session_with_port();

        assert!(session.end());
        assert_eq!(session.state(), SessionState::Evaluating);

        // A racing second end (e.g. socket close after the button) is a no-op
        assert!(!session.end());
        assert_eq!(port.states.lock().unwrap().as_slice(), &[SessionState::Evaluating]);
        // The agent never closed on us
        assert!(!port.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_frames_dropped_until_connected() {
        let (session, _port) = session_with_port();

        session.push_frames(&vec![0.1f32; 4096]);
        assert_eq!(session.accumulator.lock().unwrap().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_evaluate_rejects_live_session() {
        std::env::set_var("GOOGLE_GEMINI_API_KEY", "test-key");
        let generate = GenerateClient::new(&crate::config::AppConfig::default().agent).unwrap();

        let (session, _port) = session_with_port();
        assert!(!session.is_torn_down());

        // The in-progress check fires before any network call
        let err = evaluate_session(&session, &generate).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_registry_enforces_session_cap() {
        let registry = SessionRegistry::new(2);

        let (a, _) = session_with_port();
        let (b, _) = session_with_port();
        let (c, _) = session_with_port();

        assert!(registry.insert(a).is_ok());
        assert!(registry.insert(b).is_ok());
        let err = registry.insert(c).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_lookup_and_remove() {
        let registry = SessionRegistry::new(4);
        let (session, _) = session_with_port();
        let id = session.session_id.clone();

        registry.insert(session).unwrap();
        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }
}
