//! # Transcript Assembly
//!
//! Builds the ordered interview log handed to the evaluator. Both sides
//! follow the same accumulate-then-flush pattern:
//!
//! - Candidate speech fragments collect in a pending buffer and flush into
//!   one entry when the agent starts its next turn (a speaker switch marks
//!   the utterance boundary) or when the session ends.
//! - Agent speech fragments collect per turn and commit on turn completion —
//!   or are discarded wholesale when the candidate interrupts, because an
//!   interrupted utterance was never fully said.
//!
//! The result alternates speakers in practice but is **not** guaranteed to
//! strictly alternate; consumers must not assume it does.

use serde::{Deserialize, Serialize};

/// Who said an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

/// One committed utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Accumulates fragments into an append-only, ordered transcript.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    entries: Vec<TranscriptEntry>,
    pending_agent: String,
    pending_user: String,
    finished: bool,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment of the agent's spoken words to the current turn.
    /// Fragments arrive as contiguous pieces of one utterance, so they are
    /// concatenated verbatim.
    pub fn push_agent_fragment(&mut self, text: &str) {
        if self.finished {
            return;
        }
        self.pending_agent.push_str(text);
    }

    /// Append one fragment of candidate speech. Fragments are separate
    /// utterance segments, so they join with a space.
    pub fn push_user_fragment(&mut self, text: &str) {
        if self.finished {
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.pending_user.is_empty() {
            self.pending_user.push(' ');
        }
        self.pending_user.push_str(text);
    }

    /// Commit the agent's completed turn. Empty buffers commit nothing.
    pub fn commit_agent_turn(&mut self) -> Option<TranscriptEntry> {
        let text = std::mem::take(&mut self.pending_agent);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let entry = TranscriptEntry {
            speaker: Speaker::Agent,
            text: text.to_string(),
        };
        self.entries.push(entry.clone());
        Some(entry)
    }

    /// Throw away the in-progress agent turn (interruption). The discarded
    /// text never reaches the transcript.
    pub fn discard_agent_turn(&mut self) {
        self.pending_agent.clear();
    }

    /// Flush the pending candidate utterance, if any.
    pub fn flush_user(&mut self) -> Option<TranscriptEntry> {
        let text = std::mem::take(&mut self.pending_user);
        if text.is_empty() {
            return None;
        }
        let entry = TranscriptEntry {
            speaker: Speaker::User,
            text,
        };
        self.entries.push(entry.clone());
        Some(entry)
    }

    /// Flush both pending buffers (candidate first) and freeze the log.
    /// Idempotent: a second call changes nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.flush_user();
        self.commit_agent_turn();
        self.finished = true;
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Copy of the committed log, for the evaluator.
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_fragments_join_into_one_utterance() {
        let mut assembler = TranscriptAssembler::new();
        assembler.push_user_fragment("I have");
        assembler.push_user_fragment("five years experience");

        let entry = assembler.flush_user().unwrap();
        assert_eq!(entry.speaker, Speaker::User);
        assert_eq!(entry.text, "I have five years experience");
        // Buffer is consumed
        assert!(assembler.flush_user().is_none());
    }

    #[test]
    fn test_agent_turn_commits_once() {
        let mut assembler = TranscriptAssembler::new();
        assembler.push_agent_fragment("Hello ");
        assembler.push_agent_fragment("there.");

        let entry = assembler.commit_agent_turn().unwrap();
        assert_eq!(entry.speaker, Speaker::Agent);
        assert_eq!(entry.text, "Hello there.");

        // A second turn boundary with nothing accumulated appends nothing
        assert!(assembler.commit_agent_turn().is_none());
        assert_eq!(assembler.entries().len(), 1);
    }

    #[test]
    fn test_discard_drops_interrupted_turn() {
        let mut assembler = TranscriptAssembler::new();
        assembler.push_agent_fragment("Let me tell you about");
        assembler.discard_agent_turn();

        assert!(assembler.commit_agent_turn().is_none());
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_finish_flushes_user_before_agent() {
        let mut assembler = TranscriptAssembler::new();
        assembler.push_agent_fragment("And final");
        assembler.push_user_fragment("thank you");
        assembler.finish();

        let entries = assembler.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[1].speaker, Speaker::Agent);

        // Frozen: nothing accumulates after finish
        assembler.push_user_fragment("late");
        assembler.finish();
        assert_eq!(assembler.entries().len(), 2);
    }

    #[test]
    fn test_whitespace_only_fragments_commit_nothing() {
        let mut assembler = TranscriptAssembler::new();
        assembler.push_agent_fragment("   ");
        assembler.push_user_fragment("  ");

        assert!(assembler.commit_agent_turn().is_none());
        assert!(assembler.flush_user().is_none());
    }
}
