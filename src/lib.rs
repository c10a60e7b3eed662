//! Connection recovery and speaker flow control for a voice-assistant speaker.
//!
//! The crate owns two cooperating state machines:
//!
//! - [`reconnect_manager::ReconnectionController`] tears down and rebuilds the WiFi link, the
//!   MQTT transport, the OTA channel and the voice session in a fixed order after any
//!   connectivity failure. Every stage is guarded by a [`watchdog::WatchdogBank`] deadline that
//!   resets the device if the stage wedges.
//! - [`speaker_flow::SpeakerFlowController`] runs inside the audio tick and keeps the playback
//!   ring buffer within bounds, telling the voice service about sustained buffer transitions.
//!
//! [`health_monitor::NetworkHealthMonitor`] feeds the controller when the network receive task
//! silently dies. Hardware and vendor SDKs are reached through the traits in [`drivers`]; the
//! ESP-IDF implementations live in `platform` and are only built for the device target.

pub mod config;
pub mod drivers;
pub mod echo_markers;
pub mod events;
pub mod health_monitor;
pub mod reboot_log;
pub mod reconnect_manager;
pub mod retry;
pub mod speaker_flow;
pub mod system_state;
pub mod time;
pub mod ux;
pub mod watchdog;

#[cfg(target_os = "espidf")]
pub mod platform;

pub use config::VoxlinkConfig;
pub use events::{ReconnectEvent, RecoveryStage, SessionDisconnectCode};
pub use reconnect_manager::{Collaborators, ReconnectionController, RecoveryOutcome};
pub use speaker_flow::{BufferState, MicState, SpeakerFlowController};
pub use system_state::ReconnectShared;
pub use watchdog::WatchdogBank;
