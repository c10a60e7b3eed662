// Recovery Events Module
// Vocabulary shared by every task that can break or rebuild connectivity

// Import serde so stages can be persisted in reboot records
use serde::{Deserialize, Serialize};

/// Cause of a connectivity break. Raised by drivers, the speaker flow controller and the
/// network health monitor, consumed by the reconnection controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectEvent {
    InvalidSequence,     // Voice service saw an out-of-order sequence number
    MessageTampered,     // Voice service rejected a message signature
    ApiDeprecated,       // Voice service no longer accepts our API version
    EncryptionError,     // Session encryption failed
    SessionDisconnect,   // Voice session dropped or stalled
    NetworkLoss,         // WiFi link or receive path is gone
    TransportDisconnect, // MQTT broker connection dropped
}

/// Stages of the recovery cycle, in the order a full cycle visits them
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryStage {
    Idle = 0,
    LinkLoss = 1,
    LinkFix = 2,
    TransportReconnect = 3,
    OtaDisconnect = 4,
    OtaReconnect = 5,
    SessionDisconnect = 6,
    SessionReconnect = 7,
    LinkUp = 8,
    FatalReboot = 9,
}

/// Reason handed to the voice service when the session is closed from our side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionDisconnectCode {
    #[default]
    None,
    InvalidSequence,
    MessageTampered,
    ApiDeprecated,
    EncryptionError,
    GoingOffline,
}

impl ReconnectEvent {
    /// Stage the controller enters for this event, and the disconnect code it carries
    pub fn entry(self) -> (RecoveryStage, SessionDisconnectCode) {
        match self {
            ReconnectEvent::InvalidSequence => (
                RecoveryStage::SessionDisconnect,
                SessionDisconnectCode::InvalidSequence,
            ),
            ReconnectEvent::MessageTampered => (
                RecoveryStage::SessionDisconnect,
                SessionDisconnectCode::MessageTampered,
            ),
            ReconnectEvent::ApiDeprecated => (
                RecoveryStage::SessionDisconnect,
                SessionDisconnectCode::ApiDeprecated,
            ),
            ReconnectEvent::EncryptionError => (
                RecoveryStage::SessionDisconnect,
                SessionDisconnectCode::EncryptionError,
            ),
            ReconnectEvent::SessionDisconnect => {
                (RecoveryStage::SessionDisconnect, SessionDisconnectCode::None)
            }
            ReconnectEvent::NetworkLoss => (RecoveryStage::LinkLoss, SessionDisconnectCode::None),
            ReconnectEvent::TransportDisconnect => {
                (RecoveryStage::TransportReconnect, SessionDisconnectCode::None)
            }
        }
    }
}

/// Map a disconnect code reported by the voice service to the event the application raises.
///
/// Protocol faults keep their own event so the controller echoes the code back when it closes
/// the session. Anything else the service sends restarts the session. `None` raises nothing.
pub fn event_for_disconnect(code: SessionDisconnectCode) -> Option<ReconnectEvent> {
    match code {
        SessionDisconnectCode::None => None,
        SessionDisconnectCode::InvalidSequence => Some(ReconnectEvent::InvalidSequence),
        SessionDisconnectCode::MessageTampered => Some(ReconnectEvent::MessageTampered),
        SessionDisconnectCode::ApiDeprecated => Some(ReconnectEvent::ApiDeprecated),
        SessionDisconnectCode::EncryptionError => Some(ReconnectEvent::EncryptionError),
        SessionDisconnectCode::GoingOffline => Some(ReconnectEvent::SessionDisconnect),
    }
}

impl RecoveryStage {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a stage stored in an atomic. Unknown values are treated as fatal.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => RecoveryStage::Idle,
            1 => RecoveryStage::LinkLoss,
            2 => RecoveryStage::LinkFix,
            3 => RecoveryStage::TransportReconnect,
            4 => RecoveryStage::OtaDisconnect,
            5 => RecoveryStage::OtaReconnect,
            6 => RecoveryStage::SessionDisconnect,
            7 => RecoveryStage::SessionReconnect,
            8 => RecoveryStage::LinkUp,
            _ => RecoveryStage::FatalReboot,
        }
    }

    /// Session actions are safe once the cycle has brought everything back up
    pub const fn is_online(self) -> bool {
        matches!(self, RecoveryStage::Idle | RecoveryStage::LinkUp)
    }

    pub const fn label(self) -> &'static str {
        match self {
            RecoveryStage::Idle => "idle",
            RecoveryStage::LinkLoss => "link-loss",
            RecoveryStage::LinkFix => "link-fix",
            RecoveryStage::TransportReconnect => "transport-reconnect",
            RecoveryStage::OtaDisconnect => "ota-disconnect",
            RecoveryStage::OtaReconnect => "ota-reconnect",
            RecoveryStage::SessionDisconnect => "session-disconnect",
            RecoveryStage::SessionReconnect => "session-reconnect",
            RecoveryStage::LinkUp => "link-up",
            RecoveryStage::FatalReboot => "fatal-reboot",
        }
    }
}

impl core::fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}
