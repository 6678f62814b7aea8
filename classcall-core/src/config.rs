//! Call configuration
//!
//! Every field has a default so a partial JSON file is enough.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not read the file
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Signaling channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Shared broadcast topic all participants subscribe to
    pub topic: String,
    /// Fixed delay before resubscribing after a transport error
    pub reconnect_delay_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            topic: "classroom-video-calls".to_string(),
            reconnect_delay_ms: 3_000,
        }
    }
}

impl SignalingConfig {
    /// Reconnect delay as a duration
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Microphone processing preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPreferences {
    /// Echo cancellation
    pub echo_cancellation: bool,
    /// Noise suppression
    pub noise_suppression: bool,
    /// Automatic gain control
    pub auto_gain_control: bool,
    /// Preferred sample rate in Hz
    pub sample_rate: Option<u32>,
}

impl Default for AudioPreferences {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: Some(48_000),
        }
    }
}

/// Camera facing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    User,
    /// Rear camera
    Environment,
}

/// Camera preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoPreferences {
    /// Ideal width in pixels
    pub width: u32,
    /// Ideal height in pixels
    pub height: u32,
    /// Preferred camera
    pub facing_mode: Option<FacingMode>,
}

impl Default for VideoPreferences {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            facing_mode: Some(FacingMode::User),
        }
    }
}

/// Call subsystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Signaling channel
    pub signaling: SignalingConfig,
    /// How long an unanswered incoming offer keeps ringing
    pub incoming_offer_timeout_ms: u64,
    /// How long the caller waits for an answer
    pub outgoing_offer_timeout_ms: u64,
    /// ICE servers handed to the peer connection
    pub ice_servers: Vec<IceServerConfig>,
    /// Microphone preferences
    pub audio: AudioPreferences,
    /// Camera preferences
    pub video: VideoPreferences,
    /// Remote candidates held while no remote description is set
    pub max_buffered_candidates: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            incoming_offer_timeout_ms: 30_000,
            outgoing_offer_timeout_ms: 30_000,
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            audio: AudioPreferences::default(),
            video: VideoPreferences::default(),
            max_buffered_candidates: 64,
        }
    }
}

impl CallConfig {
    /// Load and validate a JSON config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or validated
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded call config");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signaling.topic.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "signaling.topic cannot be empty".to_string(),
            ));
        }
        if self.signaling.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "signaling.reconnect_delay_ms must be positive".to_string(),
            ));
        }
        if self.incoming_offer_timeout_ms == 0 || self.outgoing_offer_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "offer timeouts must be positive".to_string(),
            ));
        }
        if let Some(server) = self.ice_servers.iter().find(|s| s.urls.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "ICE server entry has no urls: {:?}",
                server
            )));
        }
        Ok(())
    }

    /// Incoming offer expiry
    #[must_use]
    pub fn incoming_offer_timeout(&self) -> Duration {
        Duration::from_millis(self.incoming_offer_timeout_ms)
    }

    /// Outgoing offer expiry
    #[must_use]
    pub fn outgoing_offer_timeout(&self) -> Duration {
        Duration::from_millis(self.outgoing_offer_timeout_ms)
    }
}
