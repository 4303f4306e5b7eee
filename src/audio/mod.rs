//! # Audio Pipeline Module
//!
//! The sample-level half of the gateway: framing, transport encoding, and
//! ordered playback scheduling.
//!
//! ## Key Components:
//! - **Frame Accumulator**: variable browser capture frames → fixed 100 ms send units
//! - **Codec**: f32 ↔ base64-wrapped 16-bit LE PCM, with nearest-neighbor resampling
//! - **Playback Scheduler**: strict-FIFO single-active-chunk delivery of
//!   synthesized speech, plus the avatar-facing speaking signal
//!
//! ## Fixed rates:
//! - Outbound to the agent: 16 kHz mono PCM
//! - Inbound from the agent: 24 kHz mono PCM

pub mod accumulator; // fixed-size framing of microphone samples
pub mod codec;       // transport encode/decode and resampling
pub mod playback;    // ordered playback queue and speaking signal
