//! # Turn & Interruption State Machine
//!
//! Interprets the agent's event stream and drives the playback scheduler and
//! transcript assembler. The remote agent owns turn boundaries — this machine
//! only reacts, in whatever order events arrive, including `interrupted`
//! landing mid-chunk-stream.
//!
//! All mutation happens inside a single `handle_event` dispatch owned by the
//! session's event loop; no state is shared with callbacks. Committed
//! transcript entries are returned to the caller so the client can render
//! live captions.
//!
//! ## Turn-end sequencing:
//! `turnComplete` arrives from the agent well before the queued audio has
//! finished playing, so the speaking signal is not dropped immediately.
//! Instead a drain wait starts: a grace delay, then poll-until-drained. The
//! very first agent turn uses a multi-second grace because `turnComplete`
//! can beat the first audio chunk through the warming pipe; later turns use
//! a short one.

use crate::agent::events::AgentEvent;
use crate::audio::playback::PlaybackScheduler;
use crate::config::AudioConfig;
use crate::interview::transcript::{TranscriptAssembler, TranscriptEntry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Where the conversational floor currently is. Candidate speech is implicit:
/// the machine learns about it only through transcripts and interruptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    WaitingForAgent,
    AgentSpeaking,
    Interrupted,
}

/// Event-dispatch state machine for one interview session.
pub struct TurnMachine {
    phase: TurnPhase,
    scheduler: Arc<PlaybackScheduler>,
    transcript: Arc<Mutex<TranscriptAssembler>>,
    first_turn_grace: Duration,
    turn_grace: Duration,
    completed_first_turn: bool,
    drain_wait: Option<JoinHandle<()>>,
}

impl TurnMachine {
    pub fn new(
        scheduler: Arc<PlaybackScheduler>,
        transcript: Arc<Mutex<TranscriptAssembler>>,
        audio: &AudioConfig,
    ) -> Self {
        Self {
            phase: TurnPhase::WaitingForAgent,
            scheduler,
            transcript,
            first_turn_grace: Duration::from_millis(audio.first_turn_grace_ms),
            turn_grace: Duration::from_millis(audio.turn_grace_ms),
            completed_first_turn: false,
            drain_wait: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Process one inbound event. Returns the transcript entry this event
    /// committed, if any. Terminal events are the lifecycle manager's
    /// concern and are ignored here.
    pub fn handle_event(&mut self, event: AgentEvent) -> Option<TranscriptEntry> {
        match event {
            AgentEvent::AudioChunk(chunk) => {
                let mut flushed = None;
                if self.phase != TurnPhase::AgentSpeaking {
                    // Speaker switch: the candidate's utterance is complete.
                    flushed = self.transcript.lock().unwrap().flush_user();
                    self.phase = TurnPhase::AgentSpeaking;
                    self.cancel_drain_wait();
                }
                self.scheduler.enqueue(chunk);
                flushed
            }

            AgentEvent::SpeechTranscript(text) => {
                self.transcript.lock().unwrap().push_agent_fragment(&text);
                None
            }

            AgentEvent::UserTranscript(text) => {
                self.transcript.lock().unwrap().push_user_fragment(&text);
                None
            }

            AgentEvent::TextFragment(text) => {
                // Internal model text, not spoken output. Never transcribed.
                debug!(chars = text.len(), "ignoring internal model text");
                None
            }

            AgentEvent::Interrupted => {
                // Synchronous with respect to the queue: stop() clears and
                // halts before this handler returns, so no pre-interruption
                // chunk can be delivered afterwards.
                self.scheduler.stop();
                self.transcript.lock().unwrap().discard_agent_turn();
                self.cancel_drain_wait();
                if self.phase == TurnPhase::AgentSpeaking {
                    self.phase = TurnPhase::Interrupted;
                }
                None
            }

            AgentEvent::TurnComplete => {
                let committed = self.transcript.lock().unwrap().commit_agent_turn();

                let grace = if self.completed_first_turn {
                    self.turn_grace
                } else {
                    self.first_turn_grace
                };
                self.completed_first_turn = true;
                self.phase = TurnPhase::WaitingForAgent;

                self.cancel_drain_wait();
                let scheduler = Arc::clone(&self.scheduler);
                self.drain_wait = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    scheduler.settle_idle().await;
                }));

                committed
            }

            AgentEvent::Closed { .. } | AgentEvent::Error(_) => None,
        }
    }

    fn cancel_drain_wait(&mut self) {
        if let Some(task) = self.drain_wait.take() {
            task.abort();
        }
    }
}

impl Drop for TurnMachine {
    fn drop(&mut self) {
        self.cancel_drain_wait();
    }
}
