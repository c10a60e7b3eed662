// Driver Traits Module
// Narrow seams to the radio, the MQTT stack, the voice service SDK, the audio streamer and the board
// Recovery code only ever talks to these; the ESP-IDF implementations live in `platform`

// Import anyhow for error handling following existing patterns
use anyhow::Result;

// Import serde for the persisted registration record
use serde::{Deserialize, Serialize};

use crate::events::{RecoveryStage, SessionDisconnectCode};
use crate::speaker_flow::BufferState;
use crate::ux::UxState;

/// Physical network link (WiFi station)
#[allow(async_fn_in_trait)]
pub trait LinkDriver {
    /// Bring the link back up. Implementations bound their own wait.
    async fn reconnect(&mut self) -> Result<()>;
}

/// Broker connection the voice session and OTA channel ride on
#[allow(async_fn_in_trait)]
pub trait TransportDriver {
    async fn disconnect(&mut self) -> Result<()>;

    async fn connect(&mut self) -> Result<()>;

    /// Re-request the device shadow after a fresh connection
    async fn resync_state(&mut self) -> Result<()>;
}

/// Firmware update job channel
#[allow(async_fn_in_trait)]
pub trait OtaChannel {
    async fn disconnect(&mut self) -> Result<()>;

    async fn connect(&mut self) -> Result<()>;
}

/// Registration issued when the device was provisioned with the voice service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub client_id: String,
    pub topic_root: String,
    pub account_id: String,
    pub shared_secret: String,
}

/// Voice service session
#[allow(async_fn_in_trait)]
pub trait VoiceSession {
    async fn disconnect(&mut self, code: SessionDisconnectCode) -> Result<()>;

    /// Connect with the stored registration. `None` lets the session use what it already holds.
    async fn connect(&mut self, registration: Option<&RegistrationRecord>) -> Result<()>;

    async fn synchronize_state(&mut self, volume: u8, alert_tokens: &[String]) -> Result<()>;

    fn terminate_speaker(&mut self);

    fn mark_disconnected(&mut self);

    fn is_connected(&self) -> bool;
}

/// Persistent store for the voice service registration
pub trait CredentialStore {
    fn load_registration(&mut self) -> Result<RegistrationRecord>;
}

/// Application state reported back to the service after reconnecting
pub trait ClientState {
    fn volume(&self) -> u8;

    fn pending_alert_tokens(&self) -> Vec<String>;
}

/// Board level side effects
pub trait DeviceHooks {
    /// Hard reset. On the device this does not return.
    fn reset(&self, reason: &str);

    fn revert_cpu_clock(&self);

    fn boost_cpu_clock(&self);

    /// Move audio processing into its reconnecting state
    fn enter_reconnecting_audio(&self);

    /// Stop any locally rendered offline prompt
    fn abort_offline_audio(&self);

    fn show(&self, state: UxState);

    /// Called on every recovery stage transition
    fn on_stage(&self, stage: RecoveryStage) {
        if let Some(state) = UxState::for_stage(stage) {
            self.show(state);
        }
    }
}

/// Playback ring buffer and decoder
pub trait AudioStreamer {
    /// Bytes waiting in the ring buffer
    fn queued_bytes(&self) -> u32;

    /// Queued bytes without framing overhead, comparable with stream offsets
    fn queued_raw_bytes(&self) -> u32;

    fn is_playing(&self) -> bool;

    fn start(&self);

    /// Stop playback and flush the buffer, returning how many bytes were thrown away
    fn stop(&self) -> u32;

    fn set_volume(&self, volume: u8);

    fn write(&self, data: &[u8]);

    /// Drop bytes from the head of the ring buffer
    fn discard(&self, bytes: u32);

    /// Consume the decoder's end-of-stream flag
    fn take_end_of_stream(&self) -> bool;
}

/// Outbound speaker events for the voice service
pub trait SpeakerNotifier {
    fn buffer_state_changed(&self, previous: BufferState, current: BufferState);

    fn marker_encountered(&self, id: u32);

    fn speaker_opened(&self, offset: u64);

    fn speaker_closed(&self, offset: u64);

    fn speaker_state_cleared(&self);

    fn skip_speaker_sequence(&self, sequence: u32);
}

/// Checks whether an OS task is alive
pub trait TaskProbe {
    fn is_running(&self, name: &str) -> bool;
}
