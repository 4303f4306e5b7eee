//! # Interview Domain
//!
//! Conversation-level logic layered on the audio pipeline: turn-taking
//! against a non-deterministic remote agent, transcript assembly, and the
//! session lifecycle that owns every acquired resource.

pub mod session;    // lifecycle manager and registry
pub mod transcript; // ordered utterance log
pub mod turn;       // turn/interruption state machine

pub use session::InterviewSpec;
