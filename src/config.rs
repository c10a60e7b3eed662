// Configuration Module
// Tunables for recovery, watchdogs, speaker flow control and the health monitor
// Persisted as one JSON document; every section falls back to the firmware defaults

// Import Embassy time utilities
use embassy_time::Duration;

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

// Import serde for JSON (de)serialization
use serde::{Deserialize, Serialize};

use crate::events::RecoveryStage;
use crate::retry::RetryPolicy;

// Recovery defaults
const OTA_CONNECT_ATTEMPTS: u32 = 3; // OTA channel connect attempts per stage entry
const SESSION_CONNECT_ATTEMPTS: u32 = 3; // Voice session connect attempts per stage entry
const SESSION_CONNECT_DELAY_MS: u64 = 500; // Pause before each session connect attempt

// Watchdog defaults (milliseconds)
const LINK_LOSS_TIMEOUT_MS: u64 = 30_000; // Tearing down session and transport
const TRANSPORT_RECONNECT_TIMEOUT_MS: u64 = 90_000; // MQTT reconnect incl. TLS handshake
const OTA_DISCONNECT_TIMEOUT_MS: u64 = 30_000;
const OTA_RECONNECT_TIMEOUT_MS: u64 = 60_000;
const SESSION_DISCONNECT_TIMEOUT_MS: u64 = 30_000;
const SESSION_RECONNECT_TIMEOUT_MS: u64 = 60_000;

// Speaker flow defaults
const SPEAKER_BUFFER_CAPACITY: u32 = 65_536; // Playback ring buffer size in bytes
const SPEAKER_UNDERRUN_THRESHOLD: u32 = 8_192; // Below this the buffer is running dry
const SPEAKER_OVERRUN_THRESHOLD: u32 = 57_344; // At or above this the buffer is nearly full
const SPEAKER_START_THRESHOLD: u32 = 16_384; // Bytes buffered before playback starts
const BUFFER_WARNING_DEBOUNCE_MS: u64 = 2_000; // Minimum gap between warning notifications
const OPEN_SPEAKER_TIMEOUT_MS: u64 = 5_000; // OpenSpeaker without data before we give up
const OPUS_DATA_BYTES: u32 = 160; // Encoded payload per frame on the wire
const OPUS_FRAME_BYTES: u32 = 164; // Payload plus the u32 length prefix in the ring buffer

// Health monitor defaults
const NETWORK_RECEIVE_TASK: &str = "NetRecv"; // Task that pumps the MQTT socket
const HEALTH_CHECK_PERIOD_MS: u64 = 1_000;
const HEALTH_CONSECUTIVE_MISSES: u8 = 2;

/// Retry policies for the stages that retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub ota_retry: RetryPolicy,
    pub session_retry: RetryPolicy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            ota_retry: RetryPolicy::immediate(OTA_CONNECT_ATTEMPTS),
            session_retry: RetryPolicy::fixed(SESSION_CONNECT_ATTEMPTS, SESSION_CONNECT_DELAY_MS),
        }
    }
}

/// Per-stage stall timeouts in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub link_loss_ms: u64,
    pub transport_reconnect_ms: u64,
    pub ota_disconnect_ms: u64,
    pub ota_reconnect_ms: u64,
    pub session_disconnect_ms: u64,
    pub session_reconnect_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            link_loss_ms: LINK_LOSS_TIMEOUT_MS,
            transport_reconnect_ms: TRANSPORT_RECONNECT_TIMEOUT_MS,
            ota_disconnect_ms: OTA_DISCONNECT_TIMEOUT_MS,
            ota_reconnect_ms: OTA_RECONNECT_TIMEOUT_MS,
            session_disconnect_ms: SESSION_DISCONNECT_TIMEOUT_MS,
            session_reconnect_ms: SESSION_RECONNECT_TIMEOUT_MS,
        }
    }
}

impl WatchdogConfig {
    /// Stall timeout for a guarded stage, `None` for stages without a watchdog
    pub fn timeout_for(&self, stage: RecoveryStage) -> Option<Duration> {
        let ms = match stage {
            RecoveryStage::LinkLoss => self.link_loss_ms,
            RecoveryStage::TransportReconnect => self.transport_reconnect_ms,
            RecoveryStage::OtaDisconnect => self.ota_disconnect_ms,
            RecoveryStage::OtaReconnect => self.ota_reconnect_ms,
            RecoveryStage::SessionDisconnect => self.session_disconnect_ms,
            RecoveryStage::SessionReconnect => self.session_reconnect_ms,
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

/// Speaker ring buffer thresholds and framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub buffer_capacity: u32,
    pub underrun_threshold: u32,
    pub overrun_threshold: u32,
    pub start_threshold: u32,
    pub warning_debounce_ms: u64,
    pub open_speaker_timeout_ms: u64,
    pub opus_data_bytes: u32,
    pub opus_frame_bytes: u32,
    pub length_prefixed_frames: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: SPEAKER_BUFFER_CAPACITY,
            underrun_threshold: SPEAKER_UNDERRUN_THRESHOLD,
            overrun_threshold: SPEAKER_OVERRUN_THRESHOLD,
            start_threshold: SPEAKER_START_THRESHOLD,
            warning_debounce_ms: BUFFER_WARNING_DEBOUNCE_MS,
            open_speaker_timeout_ms: OPEN_SPEAKER_TIMEOUT_MS,
            opus_data_bytes: OPUS_DATA_BYTES,
            opus_frame_bytes: OPUS_FRAME_BYTES,
            length_prefixed_frames: true,
        }
    }
}

impl FlowConfig {
    pub fn warning_debounce(&self) -> Duration {
        Duration::from_millis(self.warning_debounce_ms)
    }

    pub fn open_speaker_timeout(&self) -> Duration {
        Duration::from_millis(self.open_speaker_timeout_ms)
    }
}

/// Liveness probe of the network receive task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub task_name: String,
    pub period_ms: u64,
    pub consecutive_misses: u8,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            task_name: NETWORK_RECEIVE_TASK.to_string(),
            period_ms: HEALTH_CHECK_PERIOD_MS,
            consecutive_misses: HEALTH_CONSECUTIVE_MISSES,
        }
    }
}

impl HealthConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Complete tunable set, stored as one JSON document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxlinkConfig {
    pub reconnect: ReconnectConfig,
    pub watchdog: WatchdogConfig,
    pub flow: FlowConfig,
    pub health: HealthConfig,
}

impl VoxlinkConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: VoxlinkConfig = serde_json::from_str(json)
            .map_err(|e| anyhow!("Failed to parse configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("Failed to serialize configuration: {}", e))
    }

    /// Validate configuration values are consistent with each other
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in [
            ("OTA", &self.reconnect.ota_retry),
            ("session", &self.reconnect.session_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(anyhow!("{} retry policy needs at least one attempt", name));
            }
            if policy.initial_delay_ms > policy.max_delay_ms {
                return Err(anyhow!(
                    "{} retry initial delay {}ms exceeds max delay {}ms",
                    name,
                    policy.initial_delay_ms,
                    policy.max_delay_ms
                ));
            }
        }

        let w = &self.watchdog;
        if [
            w.link_loss_ms,
            w.transport_reconnect_ms,
            w.ota_disconnect_ms,
            w.ota_reconnect_ms,
            w.session_disconnect_ms,
            w.session_reconnect_ms,
        ]
        .contains(&0)
        {
            return Err(anyhow!("Watchdog timeouts must be greater than zero"));
        }

        let f = &self.flow;
        if f.underrun_threshold == 0 {
            return Err(anyhow!("Underrun threshold must be greater than zero"));
        }
        if f.underrun_threshold >= f.overrun_threshold {
            return Err(anyhow!(
                "Underrun threshold {} must be below overrun threshold {}",
                f.underrun_threshold,
                f.overrun_threshold
            ));
        }
        if f.overrun_threshold >= f.buffer_capacity {
            return Err(anyhow!(
                "Overrun threshold {} must be below buffer capacity {}",
                f.overrun_threshold,
                f.buffer_capacity
            ));
        }
        if f.start_threshold >= f.buffer_capacity {
            return Err(anyhow!("Start threshold must be below buffer capacity"));
        }
        if f.opus_data_bytes == 0 || f.opus_frame_bytes < f.opus_data_bytes {
            return Err(anyhow!(
                "Opus frame size {} cannot hold {} data bytes",
                f.opus_frame_bytes,
                f.opus_data_bytes
            ));
        }

        let h = &self.health;
        if h.task_name.is_empty() {
            return Err(anyhow!("Health monitor task name cannot be empty"));
        }
        if h.period_ms == 0 || h.consecutive_misses == 0 {
            return Err(anyhow!(
                "Health monitor period and miss count must be greater than zero"
            ));
        }

        Ok(())
    }
}
