//! # Voice Agent Integration
//!
//! Everything that talks to the hosted AI: the persistent duplex session the
//! interview runs over, and the one-shot generation calls around it.
//!
//! ## Key Components:
//! - **Channel**: outbound WebSocket session (setup, audio out, events in)
//! - **Events**: provider-agnostic event stream consumed by the turn machine
//! - **Prompt**: interviewer system-instruction builder
//! - **Generate**: token minting, company research, transcript evaluation

pub mod channel;  // duplex session transport
pub mod events;   // inbound event model
pub mod generate; // request/response collaborators
pub mod prompt;   // system instruction assembly
