// Watchdog Module
// One-shot stall timers, one per guarded recovery stage
// A timer that expires while the controller still sits in its stage resets the device

use core::cell::RefCell;

// Import Embassy synchronization primitives for cross-task coordination
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

// Import Embassy time and future utilities
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant};

// Import logging macros with consistent emoji prefixes
use log::{debug, error, info};

use crate::config::WatchdogConfig;
use crate::drivers::DeviceHooks;
use crate::events::RecoveryStage;
use crate::system_state::ReconnectShared;
use crate::time::TimeSource;

// Stages that carry a stall timer. LinkFix is bounded by the link driver itself.
const GUARDED_STAGES: [RecoveryStage; 6] = [
    RecoveryStage::LinkLoss,
    RecoveryStage::TransportReconnect,
    RecoveryStage::OtaDisconnect,
    RecoveryStage::OtaReconnect,
    RecoveryStage::SessionDisconnect,
    RecoveryStage::SessionReconnect,
];

#[derive(Debug, Clone, Copy)]
struct Slot {
    stage: RecoveryStage,
    duration: Duration,
    deadline: Option<Instant>,
}

/// Fixed bank of stage timers plus the signal that wakes the runner when deadlines move
pub struct WatchdogBank {
    slots: Mutex<CriticalSectionRawMutex, RefCell<[Slot; GUARDED_STAGES.len()]>>,
    changed: Signal<CriticalSectionRawMutex, ()>,
}

/// Diagnostic logged right before the stall reset
pub fn stall_reason(stage: RecoveryStage) -> &'static str {
    match stage {
        RecoveryStage::LinkLoss => "MQTT Disconnect timeout... resetting...",
        RecoveryStage::TransportReconnect => "MQTT Connect timeout... resetting...",
        RecoveryStage::OtaDisconnect => "OTA Disconnect timeout... resetting...",
        RecoveryStage::OtaReconnect => "OTA Connect timeout... resetting...",
        RecoveryStage::SessionDisconnect => "AIS Disconnect timeout... resetting...",
        RecoveryStage::SessionReconnect => "AIS Connect timeout... resetting...",
        _ => "Recovery stall... resetting...",
    }
}

impl WatchdogBank {
    pub fn new(config: &WatchdogConfig) -> Self {
        let slots = GUARDED_STAGES.map(|stage| Slot {
            stage,
            duration: config
                .timeout_for(stage)
                .unwrap_or(Duration::from_millis(0)),
            deadline: None,
        });

        Self {
            slots: Mutex::new(RefCell::new(slots)),
            changed: Signal::new(),
        }
    }

    /// Start (or restart) the countdown for `stage`. Returns false for unguarded stages.
    pub fn arm(&self, stage: RecoveryStage, now: Instant) -> bool {
        let armed = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            match slots.iter_mut().find(|slot| slot.stage == stage) {
                Some(slot) => {
                    slot.deadline = Some(now + slot.duration);
                    debug!(
                        "⏱️ Watchdog armed for {} ({}ms)",
                        stage,
                        slot.duration.as_millis()
                    );
                    true
                }
                None => false,
            }
        });

        if armed {
            self.changed.signal(());
        }
        armed
    }

    pub fn disarm(&self, stage: RecoveryStage) {
        let was_armed = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            slots
                .iter_mut()
                .find(|slot| slot.stage == stage)
                .and_then(|slot| slot.deadline.take())
                .is_some()
        });

        if was_armed {
            self.changed.signal(());
        }
    }

    pub fn disarm_all(&self) {
        self.slots.lock(|slots| {
            for slot in slots.borrow_mut().iter_mut() {
                slot.deadline = None;
            }
        });
        self.changed.signal(());
    }

    pub fn is_armed(&self, stage: RecoveryStage) -> bool {
        self.slots.lock(|slots| {
            slots
                .borrow()
                .iter()
                .any(|slot| slot.stage == stage && slot.deadline.is_some())
        })
    }

    /// Earliest armed deadline across the bank
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .lock(|slots| slots.borrow().iter().filter_map(|slot| slot.deadline).min())
    }

    /// Consume every expired timer. Returns the stage to reset for when an expired timer
    /// guards the stage the controller is still in.
    pub fn expire(&self, now: Instant, current: RecoveryStage) -> Option<RecoveryStage> {
        self.slots.lock(|slots| {
            let mut fired = None;
            for slot in slots.borrow_mut().iter_mut() {
                match slot.deadline {
                    Some(deadline) if deadline <= now => {
                        slot.deadline = None;
                        if slot.stage == current {
                            fired = Some(slot.stage);
                        } else {
                            debug!(
                                "⏱️ Watchdog for {} expired after the controller moved on to {}",
                                slot.stage, current
                            );
                        }
                    }
                    _ => {}
                }
            }
            fired
        })
    }

    /// Sleep until the next deadline, following re-arms, and reset the device when a guarded
    /// stage stalls. Returns the stalled stage once `hooks.reset` comes back, which only
    /// happens off-device.
    pub async fn run<T: TimeSource, H: DeviceHooks>(
        &self,
        shared: &ReconnectShared<'_>,
        time: &T,
        hooks: &H,
    ) -> RecoveryStage {
        info!("⏱️ Watchdog runner started");

        loop {
            let deadline = match self.next_deadline() {
                Some(deadline) => deadline,
                None => {
                    self.changed.wait().await;
                    continue;
                }
            };

            match select(time.sleep_until(deadline), self.changed.wait()).await {
                Either::First(()) => {
                    if let Some(stage) = self.expire(time.now(), shared.current_stage()) {
                        let reason = stall_reason(stage);
                        error!("❌ {}", reason);
                        hooks.reset(reason);
                        return stage;
                    }
                }
                Either::Second(()) => {}
            }
        }
    }
}
