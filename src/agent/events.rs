//! # Agent Session Events
//!
//! Provider-agnostic events produced by the duplex voice session. The channel
//! reader translates the agent's wire messages into this enum; everything
//! downstream (turn machine, transcript assembler, lifecycle manager) works
//! only in these terms.

use crate::audio::playback::PlaybackChunk;

/// One inbound event from the remote voice agent.
///
/// Ordering within a single wire message is preserved: transcripts first,
/// then audio, then turn-boundary signals.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Decoded synthesized speech (24 kHz mono) for the playback queue.
    AudioChunk(PlaybackChunk),

    /// Internal model text ("thinking"). Never spoken, never part of the
    /// transcript — kept distinct from `SpeechTranscript` on purpose.
    TextFragment(String),

    /// Transcription of what the agent actually said out loud.
    SpeechTranscript(String),

    /// Transcription of the candidate's speech.
    UserTranscript(String),

    /// The agent finished its response turn.
    TurnComplete,

    /// The candidate interrupted the agent mid-response.
    Interrupted,

    /// The session closed (remote close frame or clean stream end).
    Closed { reason: String },

    /// Transport or protocol failure. Terminal, like `Closed`.
    Error(String),
}
