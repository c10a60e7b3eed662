use crate::events::RecoveryStage;

/// What the status indicator shows while recovery runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UxState {
    Disconnected, // Link is down or being torn down
    Reconnecting, // Link is up, upper layers are coming back
    Connected,    // Session is back
    SystemFault,  // About to reset
}

/// RGB channel levels for the status LEDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedColor {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
}

impl UxState {
    /// Indicator state mirroring a recovery stage. Idle leaves the indicator to the application.
    pub fn for_stage(stage: RecoveryStage) -> Option<Self> {
        match stage {
            RecoveryStage::Idle => None,
            RecoveryStage::LinkLoss | RecoveryStage::LinkFix => Some(UxState::Disconnected),
            RecoveryStage::TransportReconnect
            | RecoveryStage::OtaDisconnect
            | RecoveryStage::OtaReconnect
            | RecoveryStage::SessionDisconnect
            | RecoveryStage::SessionReconnect => Some(UxState::Reconnecting),
            RecoveryStage::LinkUp => Some(UxState::Connected),
            RecoveryStage::FatalReboot => Some(UxState::SystemFault),
        }
    }

    pub fn color(self) -> LedColor {
        match self {
            // Red - nothing to talk to
            UxState::Disconnected | UxState::SystemFault => LedColor {
                red: true,
                green: false,
                blue: false,
            },
            // Blue - link up, session pending
            UxState::Reconnecting => LedColor {
                red: false,
                green: false,
                blue: true,
            },
            // Green - back online
            UxState::Connected => LedColor {
                red: false,
                green: true,
                blue: false,
            },
        }
    }
}
