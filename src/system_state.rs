use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info};

use crate::drivers::DeviceHooks;
use crate::events::{ReconnectEvent, RecoveryStage};

/// Side effects run exactly once when an event is accepted, before the controller wakes
pub trait AcceptHook {
    fn on_event_accepted(&self, event: ReconnectEvent);
}

// Board hooks already know how to quiet audio and drop the CPU clock
impl<H: DeviceHooks> AcceptHook for H {
    fn on_event_accepted(&self, _event: ReconnectEvent) {
        self.enter_reconnecting_audio();
        self.revert_cpu_clock();
    }
}

/// State shared between the reconnection controller and every event producer.
///
/// Producers only ever call [`raise_event`](Self::raise_event) and the snapshot getters.
/// The stage is written by the controller alone.
pub struct ReconnectShared<'a> {
    stage: AtomicU8,
    pending: AtomicBool,
    events: Signal<CriticalSectionRawMutex, ReconnectEvent>,
    liveness: Signal<CriticalSectionRawMutex, ()>,
    hook: &'a (dyn AcceptHook + Sync),
}

impl<'a> ReconnectShared<'a> {
    pub const fn new(hook: &'a (dyn AcceptHook + Sync)) -> Self {
        Self {
            stage: AtomicU8::new(RecoveryStage::Idle.as_u8()),
            pending: AtomicBool::new(false),
            events: Signal::new(),
            liveness: Signal::new(),
            hook,
        }
    }

    /// Request a recovery cycle. Accepted only while Idle with nothing pending;
    /// a rejected event changes nothing.
    pub fn raise_event(&self, event: ReconnectEvent) -> bool {
        let stage = self.current_stage();
        if stage != RecoveryStage::Idle {
            debug!("🔁 Dropping {:?}, recovery already in {}", event, stage);
            return false;
        }

        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("🔁 Dropping {:?}, another event is pending", event);
            return false;
        }

        info!("🔁 Reconnect event accepted: {:?}", event);
        self.hook.on_event_accepted(event);
        self.events.signal(event);
        true
    }

    pub fn current_stage(&self) -> RecoveryStage {
        RecoveryStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    /// True while Idle or at LinkUp, when session actions are safe
    pub fn is_online(&self) -> bool {
        self.current_stage().is_online()
    }

    pub fn is_event_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    // Returning to Idle ends the cycle and opens the gate for the next event
    pub(crate) fn set_stage(&self, stage: RecoveryStage) {
        self.stage.store(stage.as_u8(), Ordering::Release);
        if stage == RecoveryStage::Idle {
            self.pending.store(false, Ordering::Release);
        }
    }

    pub(crate) async fn wait_event(&self) -> ReconnectEvent {
        self.events.wait().await
    }

    /// Let a suspended health monitor resume polling
    pub fn rearm_liveness_probe(&self) {
        self.liveness.signal(());
    }

    pub(crate) fn clear_liveness(&self) {
        self.liveness.reset();
    }

    pub(crate) async fn wait_liveness_rearm(&self) {
        self.liveness.wait().await
    }
}
