// Event-driven Reconnection Manager using Embassy async runtime
// Rebuilds link, transport, OTA channel and voice session in order after any connectivity break

// Import logging macros with consistent emoji prefixes
use log::{error, info, warn};

use crate::config::ReconnectConfig;
use crate::drivers::{
    ClientState, CredentialStore, DeviceHooks, LinkDriver, OtaChannel, TransportDriver,
    VoiceSession,
};
use crate::events::{ReconnectEvent, RecoveryStage, SessionDisconnectCode};
use crate::retry::Backoff;
use crate::system_state::ReconnectShared;
use crate::time::TimeSource;
use crate::watchdog::WatchdogBank;

/// How a recovery cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered, // Back to Idle with everything connected
    Rebooted,  // Reset was requested
}

/// Everything the controller drives, owned for the lifetime of the controller
pub struct Collaborators<L, T, O, V, C, S> {
    pub link: L,
    pub transport: T,
    pub ota: O,
    pub session: V,
    pub credentials: C,
    pub client: S,
}

/// Reconnection Manager - owns the recovery state machine
pub struct ReconnectionController<'a, L, T, O, V, C, S, K, H> {
    drivers: Collaborators<L, T, O, V, C, S>,
    shared: &'a ReconnectShared<'a>,
    watchdogs: &'a WatchdogBank,
    hooks: &'a H,
    time: K,
    config: ReconnectConfig,
    disconnect_code: SessionDisconnectCode,
}

impl<'a, L, T, O, V, C, S, K, H> ReconnectionController<'a, L, T, O, V, C, S, K, H>
where
    L: LinkDriver,
    T: TransportDriver,
    O: OtaChannel,
    V: VoiceSession,
    C: CredentialStore,
    S: ClientState,
    K: TimeSource,
    H: DeviceHooks,
{
    pub fn new(
        drivers: Collaborators<L, T, O, V, C, S>,
        shared: &'a ReconnectShared<'a>,
        watchdogs: &'a WatchdogBank,
        hooks: &'a H,
        time: K,
        config: ReconnectConfig,
    ) -> Self {
        info!("🔁 Creating reconnection controller");
        Self {
            drivers,
            shared,
            watchdogs,
            hooks,
            time,
            config,
            disconnect_code: SessionDisconnectCode::None,
        }
    }

    pub fn collaborators(&self) -> &Collaborators<L, T, O, V, C, S> {
        &self.drivers
    }

    pub fn current_stage(&self) -> RecoveryStage {
        self.shared.current_stage()
    }

    /// Main controller loop - one recovery cycle per accepted event.
    /// Only returns when a cycle ended in a reset request.
    pub async fn run(&mut self) {
        info!("🚀 Starting reconnection controller");
        loop {
            if self.process_next().await == RecoveryOutcome::Rebooted {
                error!("❌ Reconnection controller stopped, waiting for reset");
                return;
            }
        }
    }

    /// Wait for the next accepted event and run its cycle to completion
    pub async fn process_next(&mut self) -> RecoveryOutcome {
        let event = self.shared.wait_event().await;
        self.recover(event).await
    }

    /// Run one full cycle for `event`. There is no cancellation: the cycle ends in Idle or reset.
    pub async fn recover(&mut self, event: ReconnectEvent) -> RecoveryOutcome {
        let (mut stage, code) = event.entry();
        info!("🔄 Recovering from {:?}, starting at {}", event, stage);

        self.disconnect_code = code;
        self.enter(stage);

        loop {
            let next = match stage {
                RecoveryStage::Idle => return RecoveryOutcome::Recovered,
                RecoveryStage::FatalReboot => {
                    error!("❌ Recovery failed, rebooting");
                    self.hooks.reset("Reconnection failed at link level");
                    return RecoveryOutcome::Rebooted;
                }
                RecoveryStage::LinkLoss => self.link_loss().await,
                RecoveryStage::LinkFix => self.link_fix().await,
                RecoveryStage::TransportReconnect => self.transport_reconnect().await,
                RecoveryStage::OtaDisconnect => self.ota_disconnect().await,
                RecoveryStage::OtaReconnect => self.ota_reconnect().await,
                RecoveryStage::SessionDisconnect => self.session_disconnect().await,
                RecoveryStage::SessionReconnect => self.session_reconnect().await,
                RecoveryStage::LinkUp => self.link_up(),
            };

            self.watchdogs.disarm(stage);
            stage = next;
            self.enter(stage);
        }
    }

    fn enter(&self, stage: RecoveryStage) {
        info!("🔁 Recovery stage: {}", stage);
        self.shared.set_stage(stage);
        self.hooks.on_stage(stage);
    }

    fn arm_watchdog(&self, stage: RecoveryStage) {
        self.watchdogs.arm(stage, self.time.now());
    }

    fn teardown_session(&mut self) {
        self.drivers.session.terminate_speaker();
        self.drivers.session.mark_disconnected();
    }

    async fn link_loss(&mut self) -> RecoveryStage {
        self.arm_watchdog(RecoveryStage::LinkLoss);
        self.teardown_session();

        if let Err(e) = self.drivers.transport.disconnect().await {
            warn!("⚠️ Transport disconnect during link loss failed: {}", e);
        }
        RecoveryStage::LinkFix
    }

    async fn link_fix(&mut self) -> RecoveryStage {
        info!("📶 Waiting for the network link to come back");
        match self.drivers.link.reconnect().await {
            Ok(()) => {
                info!("✅ Network link restored");
                RecoveryStage::TransportReconnect
            }
            Err(e) => {
                error!("❌ Network link could not be restored: {}", e);
                RecoveryStage::FatalReboot
            }
        }
    }

    async fn transport_reconnect(&mut self) -> RecoveryStage {
        self.arm_watchdog(RecoveryStage::TransportReconnect);
        self.teardown_session();

        if let Err(e) = self.drivers.transport.disconnect().await {
            warn!("⚠️ Transport disconnect before reconnect failed: {}", e);
        }

        match self.drivers.transport.connect().await {
            Ok(()) => {
                info!("✅ MQTT transport reconnected");
                if let Err(e) = self.drivers.transport.resync_state().await {
                    warn!("⚠️ Shadow resync after reconnect failed: {}", e);
                }
                RecoveryStage::OtaDisconnect
            }
            Err(e) => {
                error!("❌ MQTT transport reconnect failed: {}", e);
                RecoveryStage::FatalReboot
            }
        }
    }

    async fn ota_disconnect(&mut self) -> RecoveryStage {
        self.arm_watchdog(RecoveryStage::OtaDisconnect);

        match self.drivers.ota.disconnect().await {
            Ok(()) => RecoveryStage::OtaReconnect,
            Err(e) => {
                warn!("⚠️ OTA channel disconnect failed: {}", e);
                RecoveryStage::LinkLoss
            }
        }
    }

    async fn ota_reconnect(&mut self) -> RecoveryStage {
        let mut backoff = Backoff::new(self.config.ota_retry);

        while let Some(attempt) = backoff.next_attempt(&self.time).await {
            self.arm_watchdog(RecoveryStage::OtaReconnect);

            match self.drivers.ota.connect().await {
                Ok(()) => {
                    info!("✅ OTA channel reconnected on attempt {}", attempt);
                    return if self.drivers.session.is_connected() {
                        RecoveryStage::SessionDisconnect
                    } else {
                        RecoveryStage::SessionReconnect
                    };
                }
                Err(e) => warn!("⚠️ OTA connect attempt {} failed: {}", attempt, e),
            }
        }

        error!(
            "❌ OTA channel did not reconnect after {} attempts",
            backoff.attempts_made()
        );
        RecoveryStage::LinkLoss
    }

    async fn session_disconnect(&mut self) -> RecoveryStage {
        self.arm_watchdog(RecoveryStage::SessionDisconnect);
        self.drivers.session.terminate_speaker();

        let code = match self.disconnect_code {
            SessionDisconnectCode::None => SessionDisconnectCode::GoingOffline,
            code => code,
        };
        self.disconnect_code = SessionDisconnectCode::None;

        match self.drivers.session.disconnect(code).await {
            Ok(()) => {
                info!("🔌 Voice session closed with {:?}", code);
                RecoveryStage::SessionReconnect
            }
            Err(e) => {
                warn!("⚠️ Voice session disconnect ({:?}) failed: {}", code, e);
                RecoveryStage::LinkLoss
            }
        }
    }

    async fn session_reconnect(&mut self) -> RecoveryStage {
        let mut backoff = Backoff::new(self.config.session_retry);

        while let Some(attempt) = backoff.next_attempt(&self.time).await {
            self.arm_watchdog(RecoveryStage::SessionReconnect);

            let registration = match self.drivers.credentials.load_registration() {
                Ok(record) => Some(record),
                Err(e) => {
                    error!("❌ Could not load voice registration: {}", e);
                    None
                }
            };

            match self.drivers.session.connect(registration.as_ref()).await {
                Ok(()) => {
                    info!("✅ Voice session reconnected on attempt {}", attempt);
                    self.hooks.abort_offline_audio();

                    let tokens = self.drivers.client.pending_alert_tokens();
                    let volume = self.drivers.client.volume();
                    info!("⏰ Synchronizing state with {} pending alerts", tokens.len());
                    if let Err(e) = self
                        .drivers
                        .session
                        .synchronize_state(volume, &tokens)
                        .await
                    {
                        warn!("⚠️ State synchronization failed: {}", e);
                    }
                    return RecoveryStage::LinkUp;
                }
                Err(e) => warn!("⚠️ Voice session connect attempt {} failed: {}", attempt, e),
            }
        }

        error!(
            "❌ Voice session did not reconnect after {} attempts",
            backoff.attempts_made()
        );
        RecoveryStage::LinkLoss
    }

    fn link_up(&mut self) -> RecoveryStage {
        self.watchdogs.disarm_all();
        self.shared.rearm_liveness_probe();
        info!("🟢 Connectivity restored");
        RecoveryStage::Idle
    }
}
