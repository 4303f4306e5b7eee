//! # Duplex Session Channel
//!
//! The persistent bidirectional connection to the hosted voice agent. One
//! channel exists per interview session, opened with a short-lived credential
//! and a fully-built system instruction, requesting audio responses with
//! input/output speech transcription.
//!
//! ## Structure:
//! - **Writer task**: drains an unbounded mpsc of outbound frames into the
//!   socket. `send_audio` just enqueues, so the microphone frame path never
//!   blocks on the network. Send order is accumulation order.
//! - **Reader task**: parses every server payload into [`AgentEvent`]s and
//!   forwards them to the session's event loop. Whatever ordering the agent
//!   chooses — including `interrupted` mid-chunk-stream — is surfaced as-is;
//!   turn boundaries are the agent's to decide, not ours.
//!
//! ## Failure semantics:
//! A close frame, stream end, or transport error produces exactly one
//! terminal event (`Closed`/`Error`) and the reader exits. The channel never
//! reconnects on its own; a retry is a user-initiated fresh session.

use crate::agent::events::AgentEvent;
use crate::audio::codec::{self, EncodedPacket};
use crate::audio::playback::PlaybackChunk;
use crate::config::AgentConfig;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

/// Failures establishing or using the duplex session.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("agent did not acknowledge setup: {0}")]
    Setup(String),

    #[error("timed out connecting to the agent")]
    ConnectTimeout,

    #[error("session already closed")]
    SessionClosed,
}

/// Outbound frames queued for the writer task.
enum OutboundFrame {
    Audio(EncodedPacket),
    Close,
}

/// Handle to an open duplex session.
///
/// Dropping the handle (or calling [`AgentChannel::close`]) ends the writer,
/// which closes the socket, which terminates the reader with a `Closed`
/// event.
pub struct AgentChannel {
    out_tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl AgentChannel {
    /// Open the session: connect, send the setup message, and wait for the
    /// agent's acknowledgment before spawning the writer/reader tasks.
    pub async fn connect(
        agent: &AgentConfig,
        token: &str,
        system_instruction: &str,
    ) -> Result<(AgentChannel, mpsc::UnboundedReceiver<AgentEvent>), ChannelError> {
        let url = format!(
            "wss://{}/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent?key={}",
            agent.live_host, token
        );
        let budget = Duration::from_secs(agent.connect_timeout_secs);

        let (mut ws, _response) = tokio::time::timeout(budget, connect_async(url))
            .await
            .map_err(|_| ChannelError::ConnectTimeout)??;

        info!(host = %agent.live_host, model = %agent.model, "agent session connecting");

        let setup = setup_message(agent, system_instruction);
        ws.send(Message::Text(setup.to_string())).await?;

        // The agent must acknowledge setup before any audio may flow.
        let acknowledged = tokio::time::timeout(budget, async {
            while let Some(msg) = ws.next().await {
                match msg? {
                    Message::Text(text) => {
                        if is_setup_ack(&text) {
                            return Ok::<bool, ChannelError>(true);
                        }
                    }
                    Message::Binary(bytes) => {
                        if let Ok(text) = String::from_utf8(bytes) {
                            if is_setup_ack(&text) {
                                return Ok(true);
                            }
                        }
                    }
                    Message::Close(_) => return Ok(false),
                    _ => {}
                }
            }
            Ok(false)
        })
        .await
        .map_err(|_| ChannelError::ConnectTimeout)??;

        if !acknowledged {
            return Err(ChannelError::Setup(
                "connection closed before setup acknowledgment".to_string(),
            ));
        }

        info!("agent session established");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<AgentEvent>();
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Writer: strict accumulation order, ends on Close or socket failure.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    OutboundFrame::Audio(packet) => {
                        let payload = realtime_input(&packet);
                        if let Err(err) = ws_tx.send(Message::Text(payload.to_string())).await {
                            warn!(error = %err, "agent session write failed");
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = ws_tx.close().await;
            debug!("agent session writer ended");
        });

        // Reader: every server payload becomes zero or more events; exactly
        // one terminal event ends the stream.
        tokio::spawn(async move {
            let mut terminal_sent = false;

            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if !dispatch_payload(&text, &event_tx) {
                            return;
                        }
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if !dispatch_payload(&text, &event_tx) {
                                return;
                            }
                        }
                        Err(_) => warn!("agent sent non-UTF-8 binary frame, ignoring"),
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "agent closed the session".to_string());
                        let _ = event_tx.send(AgentEvent::Closed { reason });
                        terminal_sent = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = event_tx.send(AgentEvent::Error(err.to_string()));
                        terminal_sent = true;
                        break;
                    }
                }
            }

            if !terminal_sent {
                let _ = event_tx.send(AgentEvent::Closed {
                    reason: "agent stream ended".to_string(),
                });
            }
            debug!("agent session reader ended");
        });

        Ok((AgentChannel { out_tx }, event_rx))
    }

    /// Queue one encoded packet for transmission. Non-blocking; safe to call
    /// from the per-frame capture path.
    pub fn send_audio(&self, packet: EncodedPacket) -> Result<(), ChannelError> {
        self.out_tx
            .send(OutboundFrame::Audio(packet))
            .map_err(|_| ChannelError::SessionClosed)
    }

    /// Request an orderly close. Idempotent: repeated calls (or calls after
    /// the socket already died) are no-ops.
    pub fn close(&self) {
        let _ = self.out_tx.send(OutboundFrame::Close);
    }
}

/// Forward all events parsed from one payload; false when the session's
/// receiver is gone and the reader should stop.
fn dispatch_payload(text: &str, event_tx: &mpsc::UnboundedSender<AgentEvent>) -> bool {
    match parse_server_payload(text) {
        Ok(events) => {
            for event in events {
                if event_tx.send(event).is_err() {
                    return false;
                }
            }
            true
        }
        Err(err) => {
            warn!(error = %err, "unrecognized agent payload, ignoring");
            true
        }
    }
}

fn is_setup_ack(text: &str) -> bool {
    serde_json::from_str::<ServerPayload>(text)
        .map(|p| p.setup_complete.is_some())
        .unwrap_or(false)
}

/// Session-establishment message: model, AUDIO responses with the configured
/// voice, the interviewer system instruction, and speech transcription for
/// both directions.
fn setup_message(agent: &AgentConfig, system_instruction: &str) -> serde_json::Value {
    json!({
        "setup": {
            "model": format!("models/{}", agent.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": agent.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": system_instruction }]
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

/// Outbound audio envelope.
fn realtime_input(packet: &EncodedPacket) -> serde_json::Value {
    json!({
        "realtimeInput": {
            "audio": {
                "data": packet.data,
                "mimeType": packet.mime_type
            }
        }
    })
}

// ---- server wire format ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPayload {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    turn_complete: bool,
    generation_complete: bool,
    interrupted: bool,
    input_transcription: Option<TranscriptionPayload>,
    output_transcription: Option<TranscriptionPayload>,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContentPart {
    inline_data: Option<InlineBlob>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineBlob {
    #[allow(dead_code)]
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionPayload {
    #[serde(default)]
    text: String,
}

/// Translate one server payload into events, preserving in-message order:
/// transcripts, then model-turn parts, then `interrupted`, then the turn
/// boundary.
fn parse_server_payload(text: &str) -> Result<Vec<AgentEvent>, serde_json::Error> {
    let payload: ServerPayload = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if let Some(content) = payload.server_content {
        if let Some(t) = content.input_transcription {
            if !t.text.is_empty() {
                events.push(AgentEvent::UserTranscript(t.text));
            }
        }
        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                events.push(AgentEvent::SpeechTranscript(t.text));
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    match codec::decode_playback_payload(&blob.data) {
                        Ok(samples) => {
                            events.push(AgentEvent::AudioChunk(PlaybackChunk::new(samples)))
                        }
                        Err(err) => {
                            warn!(error = %err, "discarding undecodable audio chunk")
                        }
                    }
                }
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        events.push(AgentEvent::TextFragment(text));
                    }
                }
            }
        }
        if content.interrupted {
            events.push(AgentEvent::Interrupted);
        }
        if content.turn_complete || content.generation_complete {
            events.push(AgentEvent::TurnComplete);
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    fn audio_b64(samples: &[i16]) -> String {
        let mut bytes = Vec::new();
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        BASE64.encode(&bytes)
    }

    #[test]
    fn test_parse_full_turn_payload_preserves_order() {
        let payload = json!({
            "serverContent": {
                "inputTranscription": { "text": "five years" },
                "outputTranscription": { "text": "Great, tell me more." },
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": audio_b64(&[0, 1000, -1000]) } },
                        { "text": "considering follow-up" }
                    ]
                },
                "turnComplete": true
            }
        });

        let events = parse_server_payload(&payload.to_string()).unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], AgentEvent::UserTranscript(t) if t == "five years"));
        assert!(
            matches!(&events[1], AgentEvent::SpeechTranscript(t) if t == "Great, tell me more.")
        );
        assert!(matches!(&events[2], AgentEvent::AudioChunk(c) if c.samples.len() == 3));
        assert!(matches!(&events[3], AgentEvent::TextFragment(t) if t == "considering follow-up"));
        assert!(matches!(&events[4], AgentEvent::TurnComplete));
    }

    #[test]
    fn test_parse_interrupted_payload() {
        let payload = json!({ "serverContent": { "interrupted": true } });
        let events = parse_server_payload(&payload.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::Interrupted));
    }

    #[test]
    fn test_turn_and_generation_complete_collapse_to_one_event() {
        let payload = json!({
            "serverContent": { "turnComplete": true, "generationComplete": true }
        });
        let events = parse_server_payload(&payload.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::TurnComplete));
    }

    #[test]
    fn test_setup_ack_detection() {
        assert!(is_setup_ack(r#"{"setupComplete": {}}"#));
        assert!(!is_setup_ack(r#"{"serverContent": {"turnComplete": true}}"#));
        assert!(!is_setup_ack("not json"));
    }

    #[test]
    fn test_setup_message_shape() {
        let mut agent = crate::config::AppConfig::default().agent;
        agent.voice = "Puck".to_string();
        let setup = setup_message(&agent, "You are an interviewer.");

        assert_eq!(setup["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            "You are an interviewer."
        );
        assert!(setup["setup"]["model"].as_str().unwrap().starts_with("models/"));
    }

    #[test]
    fn test_realtime_input_envelope() {
        let packet = EncodedPacket {
            data: "AAAA".to_string(),
            mime_type: codec::TRANSPORT_MIME_TYPE,
        };
        let payload = realtime_input(&packet);
        assert_eq!(payload["realtimeInput"]["audio"]["data"], "AAAA");
        assert_eq!(
            payload["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }
}
