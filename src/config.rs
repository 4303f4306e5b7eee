//! # Configuration Management
//!
//! Loads and manages gateway configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_AGENT_MODEL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The agent API key is deliberately *not* part of this structure: it is read
//! from the environment at client construction time and never round-trips
//! through the `/api/v1/config` endpoint.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// HTTP server bind settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Hosted voice-agent and text-generation settings.
///
/// ## Fields:
/// - `live_host`: hostname of the bidirectional streaming endpoint (wss)
/// - `model`: realtime voice model used for the interview session
/// - `voice`: prebuilt voice name for synthesized speech
/// - `generate_url`: base URL of the request/response generation API
/// - `research_model`: model used for pre-interview company research
/// - `evaluation_model`: model used for post-interview transcript scoring
/// - `token_url`: optional endpoint minting short-lived session tokens;
///   when empty, the channel authenticates with the API key directly
/// - `api_key_env`: name of the environment variable holding the API key
/// - `connect_timeout_secs`: budget for establishing the duplex session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub live_host: String,
    pub model: String,
    pub voice: String,
    pub generate_url: String,
    pub research_model: String,
    pub evaluation_model: String,
    pub token_url: String,
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
}

/// Audio pipeline settings.
///
/// ## Fields:
/// - `transport_rate`: sample rate of audio sent to the agent (16 kHz PCM)
/// - `playback_rate`: sample rate of synthesized speech from the agent (24 kHz)
/// - `send_unit_samples`: microphone samples accumulated per outbound packet
///   (1600 samples ≈ 100 ms at 16 kHz)
/// - `drain_poll_ms`: interval for confirming playback has fully drained
/// - `first_turn_grace_ms`: delay before drain-polling on the very first agent
///   turn, masking the latency between connect and audio reaching the queue
/// - `turn_grace_ms`: the much shorter delay used once the pipe is warm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub transport_rate: u32,
    pub playback_rate: u32,
    pub send_unit_samples: usize,
    pub drain_poll_ms: u64,
    pub first_turn_grace_ms: u64,
    pub turn_grace_ms: u64,
}

/// Capacity tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of interview sessions held at once (live + awaiting
    /// evaluation retry)
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            agent: AgentConfig {
                live_host: "generativelanguage.googleapis.com".to_string(),
                model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
                voice: "Puck".to_string(),
                generate_url: "https://generativelanguage.googleapis.com".to_string(),
                research_model: "gemini-2.5-flash".to_string(),
                evaluation_model: "gemini-2.5-flash".to_string(),
                token_url: String::new(),
                api_key_env: "GOOGLE_GEMINI_API_KEY".to_string(),
                connect_timeout_secs: 15,
            },
            audio: AudioConfig {
                transport_rate: 16_000,
                playback_rate: 24_000,
                send_unit_samples: 1600, // 100ms at 16kHz
                drain_poll_ms: 200,
                first_turn_grace_ms: 2000,
                turn_grace_ms: 250,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_AGENT_MODEL=...`: Override the realtime voice model
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching these early gives a clear startup error instead of a session
    /// that fails halfway through connecting.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.agent.model.is_empty() {
            return Err(anyhow::anyhow!("Agent model cannot be empty"));
        }

        if self.agent.live_host.is_empty() {
            return Err(anyhow::anyhow!("Agent live host cannot be empty"));
        }

        if self.audio.transport_rate == 0 || self.audio.playback_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.send_unit_samples == 0 {
            return Err(anyhow::anyhow!("Send unit size must be greater than 0"));
        }

        if self.audio.drain_poll_ms == 0 {
            return Err(anyhow::anyhow!("Drain poll interval must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON string (runtime config endpoint).
    ///
    /// Only the fields present in the JSON are touched; for example
    /// `{"agent": {"voice": "Kore"}}` changes nothing but the voice. The
    /// updated configuration is re-validated before being accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(agent) = partial_config.get("agent") {
            if let Some(model) = agent.get("model").and_then(|v| v.as_str()) {
                self.agent.model = model.to_string();
            }
            if let Some(voice) = agent.get("voice").and_then(|v| v.as_str()) {
                self.agent.voice = voice.to_string();
            }
            if let Some(model) = agent.get("research_model").and_then(|v| v.as_str()) {
                self.agent.research_model = model.to_string();
            }
            if let Some(model) = agent.get("evaluation_model").and_then(|v| v.as_str()) {
                self.agent.evaluation_model = model.to_string();
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(samples) = audio.get("send_unit_samples").and_then(|v| v.as_u64()) {
                self.audio.send_unit_samples = samples as usize;
            }
            if let Some(ms) = audio.get("drain_poll_ms").and_then(|v| v.as_u64()) {
                self.audio.drain_poll_ms = ms;
            }
            if let Some(ms) = audio.get("first_turn_grace_ms").and_then(|v| v.as_u64()) {
                self.audio.first_turn_grace_ms = ms;
            }
            if let Some(ms) = audio.get("turn_grace_ms").and_then(|v| v.as_u64()) {
                self.audio.turn_grace_ms = ms;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
