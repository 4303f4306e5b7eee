//! # Browser WebSocket Handler
//!
//! The client-facing half of the gateway. Browsers connect to
//! `/ws/interview`, configure a session, and stream raw microphone frames;
//! the gateway streams synthesized speech and control signals back.
//!
//! ## WebSocket Protocol:
//! - **Client → Server (JSON)**: `start_interview`, `mic_state`,
//!   `end_interview`, `pong`
//! - **Client → Server (binary)**: little-endian f32 microphone samples at
//!   the capture rate declared in `start_interview` (variable frame sizes —
//!   whatever the browser's audio stack produces)
//! - **Server → Client (JSON)**: `session_status`, `speaking` (the single
//!   avatar boolean), `transcript`, `evaluation`, `error`, `ping`
//! - **Server → Client (binary)**: 16-bit little-endian PCM at 24 kHz for
//!   local playback
//!
//! ## Actor Model:
//! Each connection is an independent actix actor. The session pipeline runs
//! on tokio tasks and reaches the actor only through its mailbox (the
//! [`ClientPort`] implementation below), so all socket writes happen on the
//! actor's own context.

use crate::agent::generate::{Evaluation, GenerateClient};
use crate::audio::codec;
use crate::audio::playback::PlaybackChunk;
use crate::error::AppError;
use crate::interview::session::{evaluate_session, ClientPort, InterviewSession, SessionState};
use crate::interview::transcript::{Speaker, TranscriptEntry};
use crate::interview::InterviewSpec;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings the browser.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Silence budget before a browser connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages the browser sends us.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Configure and start an interview session
    #[serde(rename = "start_interview")]
    StartInterview {
        /// Dashboard id of the interview being taken
        interview_id: String,
        /// Candidate display name, used in the interviewer prompt
        candidate_name: String,
        /// Actual sample rate of the binary frames that will follow
        capture_sample_rate: u32,
        /// Interview configuration (role, difficulty, counts, ...)
        interview: InterviewSpec,
    },

    /// Mute or unmute the microphone path
    #[serde(rename = "mic_state")]
    MicState { active: bool },

    /// End the interview and request evaluation
    #[serde(rename = "end_interview")]
    EndInterview,

    /// Heartbeat response
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// Messages we send to the browser.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Lifecycle updates for the session
    #[serde(rename = "session_status")]
    SessionStatus {
        session_id: String,
        status: String,
        message: Option<String>,
    },

    /// The avatar signal: is the agent speaking right now
    #[serde(rename = "speaking")]
    Speaking { active: bool },

    /// One committed transcript entry (live captions)
    #[serde(rename = "transcript")]
    Transcript { speaker: String, text: String },

    /// Structured scoring result after the interview
    #[serde(rename = "evaluation")]
    EvaluationResult {
        session_id: String,
        result: Evaluation,
    },

    /// Errors, with enough detail for the retry surfaces
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        retryable: bool,
        rate_limited: bool,
    },

    /// Heartbeat probe
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
}

/// WebSocket actor for one browser connection.
pub struct InterviewSocket {
    app_state: web::Data<AppState>,
    session: Option<Arc<InterviewSession>>,
    generate: Option<Arc<GenerateClient>>,
    /// Guards the active-session metric against double decrements
    session_counted: bool,
    last_heartbeat: Instant,
}

impl InterviewSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            session: None,
            generate: None,
            session_counted: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "failed to serialize server message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        self.send_message(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
                retryable: false,
                rate_limited: false,
            },
        );
        warn!(code, message, "websocket error sent to client");
    }

    fn handle_start_interview(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        interview_id: String,
        candidate_name: String,
        capture_sample_rate: u32,
        interview: InterviewSpec,
    ) {
        if self.session.is_some() {
            self.send_error(ctx, "session_exists", "A session is already active on this connection");
            return;
        }
        if capture_sample_rate == 0 {
            self.send_error(ctx, "invalid_config", "capture_sample_rate must be non-zero");
            return;
        }

        let config = self.app_state.get_config();

        let generate = match GenerateClient::new(&config.agent) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                self.send_error(ctx, "config_error", &err.to_string());
                return;
            }
        };

        let session_id = Uuid::new_v4().to_string();
        let port = Arc::new(SocketPort {
            addr: ctx.address(),
            session_id: session_id.clone(),
        });
        let session = InterviewSession::new(
            session_id,
            interview_id,
            candidate_name,
            interview,
            capture_sample_rate,
            port as Arc<dyn ClientPort>,
            config.audio.clone(),
        );

        if let Err(err) = self.app_state.sessions.insert(Arc::clone(&session)) {
            self.send_error(ctx, "capacity", &err.to_string());
            return;
        }

        self.app_state.session_started();
        self.session_counted = true;
        self.session = Some(Arc::clone(&session));
        self.generate = Some(Arc::clone(&generate));

        info!(session_id = %session.session_id, "interview session starting");

        // Connect off the actor thread; progress reaches the client through
        // the port's state notifications.
        let agent_config = config.agent.clone();
        let addr = ctx.address();
        let app_state = self.app_state.clone();
        tokio::spawn(async move {
            if let Err(err) = session.connect(&generate, &agent_config).await {
                // Nothing was acquired; free the registry slot for the retry
                app_state.sessions.remove(&session.session_id);
                addr.do_send(NotifyClient(ServerMessage::Error {
                    code: "connect_failed".to_string(),
                    message: err.to_string(),
                    retryable: true,
                    rate_limited: matches!(err, AppError::RateLimited(_)),
                }));
                addr.do_send(SessionEnded);
            }
        });
    }

    fn handle_end_interview(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.clone() else {
            self.send_error(ctx, "no_session", "No interview session is active");
            return;
        };

        let Some(generate) = self.generate.clone() else {
            self.send_error(ctx, "no_session", "No interview session is active");
            return;
        };

        if !session.end() {
            self.send_error(ctx, "already_ended", "The interview has already ended");
            return;
        }
        self.mark_session_ended();

        // The transcript is frozen now; score it. Failures keep the session
        // in the registry so the client can retry over HTTP without
        // re-running the interview.
        let app_state = self.app_state.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            match evaluate_session(&session, &generate).await {
                Ok(result) => {
                    app_state.interview_evaluated();
                    addr.do_send(NotifyClient(ServerMessage::EvaluationResult {
                        session_id: session.session_id.clone(),
                        result,
                    }));
                }
                Err(err) => {
                    addr.do_send(NotifyClient(ServerMessage::Error {
                        code: "evaluation_failed".to_string(),
                        message: err.to_string(),
                        retryable: err.is_retryable(),
                        rate_limited: matches!(err, AppError::RateLimited(_)),
                    }));
                }
            }
        });
    }

    /// Binary frames carry raw little-endian f32 samples from the capture
    /// callback, in whatever frame size the browser produced.
    fn handle_audio_frame(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = &self.session else {
            self.send_error(ctx, "no_session", "Audio received before start_interview");
            return;
        };

        if data.is_empty() || data.len() % 4 != 0 {
            self.send_error(
                ctx,
                "invalid_audio",
                "Audio frames must be non-empty little-endian f32 samples",
            );
            return;
        }

        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / 4);
        while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
            samples.push(sample);
        }

        session.push_frames(&samples);
    }

    fn mark_session_ended(&mut self) {
        if self.session_counted {
            self.session_counted = false;
            self.app_state.session_ended();
        }
    }
}

/// Routes session callbacks into the actor's mailbox. Runs on pipeline
/// tasks, so it must never touch the socket directly.
struct SocketPort {
    addr: Addr<InterviewSocket>,
    session_id: String,
}

impl ClientPort for SocketPort {
    fn deliver_audio(&self, chunk: &PlaybackChunk) {
        self.addr
            .do_send(OutboundAudio(codec::pcm16_bytes(&chunk.samples)));
    }

    fn speaking_changed(&self, active: bool) {
        self.addr
            .do_send(NotifyClient(ServerMessage::Speaking { active }));
    }

    fn state_changed(&self, state: SessionState, detail: Option<String>) {
        self.addr.do_send(NotifyClient(ServerMessage::SessionStatus {
            session_id: self.session_id.clone(),
            status: state.as_str().to_string(),
            message: detail,
        }));
    }

    fn transcript_committed(&self, entry: &TranscriptEntry) {
        let speaker = match entry.speaker {
            Speaker::Agent => "agent",
            Speaker::User => "user",
        };
        self.addr.do_send(NotifyClient(ServerMessage::Transcript {
            speaker: speaker.to_string(),
            text: entry.text.clone(),
        }));
    }

    fn session_closed(&self, reason: &str) {
        self.addr.do_send(NotifyClient(ServerMessage::Error {
            code: "disconnected".to_string(),
            message: reason.to_string(),
            retryable: false,
            rate_limited: false,
        }));
        self.addr.do_send(SessionEnded);
    }
}

/// Internal: JSON notice for the client.
#[derive(Message)]
#[rtype(result = "()")]
struct NotifyClient(ServerMessage);

/// Internal: one playback chunk as raw PCM16 bytes.
#[derive(Message)]
#[rtype(result = "()")]
struct OutboundAudio(Vec<u8>);

/// Internal: the session ended somewhere off the actor thread.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionEnded;

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("browser websocket connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("browser heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            let ping = ServerMessage::Ping {
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            };
            act.send_message(ctx, &ping);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session) = self.session.take() {
            // The browser is gone; release the pipeline. The session stays
            // in the registry for HTTP evaluation retries.
            session.teardown();
            self.mark_session_ended();
            info!(session_id = %session.session_id, "browser websocket closed");
        } else {
            info!("browser websocket closed");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::StartInterview {
                    interview_id,
                    candidate_name,
                    capture_sample_rate,
                    interview,
                }) => {
                    self.handle_start_interview(
                        ctx,
                        interview_id,
                        candidate_name,
                        capture_sample_rate,
                        interview,
                    );
                }
                Ok(ClientMessage::MicState { active }) => {
                    if let Some(session) = &self.session {
                        session.set_mic(active);
                    }
                }
                Ok(ClientMessage::EndInterview) => {
                    self.handle_end_interview(ctx);
                }
                Ok(ClientMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Err(err) => {
                    self.send_error(ctx, "invalid_json", &format!("Invalid message: {}", err));
                }
            },
            Ok(ws::Message::Binary(data)) => {
                self.handle_audio_frame(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(?reason, "browser requested close");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<NotifyClient> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: NotifyClient, ctx: &mut Self::Context) {
        self.send_message(ctx, &msg.0);
    }
}

impl Handler<OutboundAudio> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundAudio, ctx: &mut Self::Context) {
        ctx.binary(msg.0);
    }
}

impl Handler<SessionEnded> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, _msg: SessionEnded, _ctx: &mut Self::Context) {
        self.mark_session_ended();

        // This notice only arrives for dead sessions (connect failure or
        // remote close). Release them so a user-initiated retry can start a
        // fresh session on the same connection.
        if let Some(session) = &self.session {
            if session.is_torn_down() {
                self.session = None;
                self.generate = None;
            }
        }
    }
}

/// HTTP → WebSocket upgrade endpoint.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "new interview websocket request"
    );
    ws::start(InterviewSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_round_trip() {
        let msg = ClientMessage::StartInterview {
            interview_id: "abc123".to_string(),
            candidate_name: "Jordan".to_string(),
            capture_sample_rate: 16_000,
            interview: InterviewSpec {
                job_role: "Backend Engineer".to_string(),
                company_name: Some("Acme".to_string()),
                difficulty: "medium".to_string(),
                num_questions: 5,
                interview_round: None,
                language: None,
                jd_text: None,
            },
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"start_interview\""));

        match serde_json::from_str::<ClientMessage>(&json).unwrap() {
            ClientMessage::StartInterview {
                interview_id,
                capture_sample_rate,
                interview,
                ..
            } => {
                assert_eq!(interview_id, "abc123");
                assert_eq!(capture_sample_rate, 16_000);
                assert_eq!(interview.num_questions, 5);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_end_interview_parses_without_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "end_interview"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::EndInterview));
    }

    #[test]
    fn test_server_error_message_serializes_flags() {
        let msg = ServerMessage::Error {
            code: "evaluation_failed".to_string(),
            message: "quota".to_string(),
            retryable: true,
            rate_limited: true,
        };
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"retryable\":true"));
        assert!(json.contains("\"rate_limited\":true"));
    }

    #[test]
    fn test_speaking_message_shape() {
        let json = serde_json::to_string(&ServerMessage::Speaking { active: true }).unwrap();
        assert_eq!(json, r#"{"type":"speaking","active":true}"#);
    }
}
