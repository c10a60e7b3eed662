// Board Hooks Module
// Reset, CPU clock boost, status LEDs and audio control for the speaker board

use core::ffi::c_char;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::ffi::CString;
use std::sync::{Mutex, OnceLock};

// Import Embassy synchronization primitives for task coordination
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

// Import ESP-IDF GPIO and system bindings
use esp_idf_svc::hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_svc::sys::{self as sys, esp};

// Import logging macros with consistent emoji prefixes
use log::{error, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use crate::drivers::{DeviceHooks, TaskProbe};
use crate::events::{ReconnectEvent, RecoveryStage};
use crate::reboot_log::{RebootLog, RebootRecord};
use crate::system_state::{AcceptHook, ReconnectShared};
use crate::ux::UxState;

use super::nvs_store::NvsRebootLog;

// Reset constants
const RESET_LOG_FLUSH_MS: u64 = 500; // Let the reset line reach the console
const CPU_BOOST_LOCK_NAME: &[u8] = b"voxlink_boost\0";

/// Requests for the audio processing task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioControl {
    Reconnecting, // Stop capturing, play the reconnecting cue
    AbortOffline, // Cut any locally rendered offline prompt
}

// Global signals for task coordination (static, allocated at compile time)
pub static AUDIO_CONTROL_SIGNAL: Signal<CriticalSectionRawMutex, AudioControl> = Signal::new();

/// Accept hook used by the global reconnect state; needs no board handles
pub struct BoardAcceptHook;

impl AcceptHook for BoardAcceptHook {
    fn on_event_accepted(&self, _event: ReconnectEvent) {
        AUDIO_CONTROL_SIGNAL.signal(AudioControl::Reconnecting);
        cpu_clock_revert();
    }
}

static BOARD_ACCEPT_HOOK: BoardAcceptHook = BoardAcceptHook;

// Shared reconnect state - raised from MQTT callbacks, the speaker tick and the health monitor
pub static RECONNECT: ReconnectShared<'static> = ReconnectShared::new(&BOARD_ACCEPT_HOOK);

struct PmLock(sys::esp_pm_lock_handle_t);

// SAFETY: power management locks may be acquired and released from any task
unsafe impl Send for PmLock {}
unsafe impl Sync for PmLock {}

static CPU_BOOST_LOCK: OnceLock<PmLock> = OnceLock::new();
static CPU_BOOSTED: AtomicBool = AtomicBool::new(false);

/// Create the max-frequency power management lock. Without power management enabled in the
/// SDK config boosting becomes a no-op.
pub fn init_cpu_boost() -> Result<()> {
    let mut handle: sys::esp_pm_lock_handle_t = core::ptr::null_mut();
    esp!(unsafe {
        sys::esp_pm_lock_create(
            sys::esp_pm_lock_type_t_ESP_PM_CPU_FREQ_MAX,
            0,
            CPU_BOOST_LOCK_NAME.as_ptr() as *const c_char,
            &mut handle,
        )
    })
    .map_err(|e| anyhow!("Failed to create CPU boost lock: {}", e))?;

    CPU_BOOST_LOCK
        .set(PmLock(handle))
        .map_err(|_| anyhow!("CPU boost lock already created"))
}

fn cpu_clock_boost() {
    if let Some(lock) = CPU_BOOST_LOCK.get() {
        if !CPU_BOOSTED.swap(true, Ordering::AcqRel) {
            unsafe { sys::esp_pm_lock_acquire(lock.0) };
        }
    }
}

fn cpu_clock_revert() {
    if let Some(lock) = CPU_BOOST_LOCK.get() {
        if CPU_BOOSTED.swap(false, Ordering::AcqRel) {
            unsafe { sys::esp_pm_lock_release(lock.0) };
        }
    }
}

/// RGB status LEDs
pub struct StatusLeds {
    red: PinDriver<'static, AnyOutputPin, Output>,
    green: PinDriver<'static, AnyOutputPin, Output>,
    blue: PinDriver<'static, AnyOutputPin, Output>,
}

impl StatusLeds {
    pub fn new(red: AnyOutputPin, green: AnyOutputPin, blue: AnyOutputPin) -> Result<Self> {
        Ok(Self {
            red: PinDriver::output(red)?,
            green: PinDriver::output(green)?,
            blue: PinDriver::output(blue)?,
        })
    }

    pub fn show(&mut self, state: UxState) {
        let color = state.color();
        let set = |pin: &mut PinDriver<'static, AnyOutputPin, Output>, on: bool| {
            if on {
                pin.set_high().ok();
            } else {
                pin.set_low().ok();
            }
        };
        set(&mut self.red, color.red);
        set(&mut self.green, color.green);
        set(&mut self.blue, color.blue);
        info!("💡 Status LEDs set for {:?}", state);
    }
}

/// Device hooks for the speaker board
pub struct EspBoardHooks {
    leds: Mutex<StatusLeds>,
    reboot_log: Mutex<NvsRebootLog>,
    last_stage: AtomicU8,
}

impl EspBoardHooks {
    pub fn new(leds: StatusLeds, reboot_log: NvsRebootLog) -> Self {
        Self {
            leds: Mutex::new(leds),
            reboot_log: Mutex::new(reboot_log),
            last_stage: AtomicU8::new(RecoveryStage::Idle.as_u8()),
        }
    }
}

impl DeviceHooks for EspBoardHooks {
    fn reset(&self, reason: &str) {
        error!("[System reset] - {}", reason);

        let stage = RecoveryStage::from_u8(self.last_stage.load(Ordering::Acquire));
        let record = RebootRecord::new(reason, Some(stage));
        match self.reboot_log.lock() {
            Ok(mut log) => {
                if let Err(e) = log.store(&record) {
                    warn!("⚠️ Reset reason not persisted: {}", e);
                }
            }
            Err(_) => warn!("⚠️ Reboot log lock poisoned, reset reason not persisted"),
        }

        std::thread::sleep(std::time::Duration::from_millis(RESET_LOG_FLUSH_MS));
        esp_idf_svc::hal::reset::restart();
    }

    fn revert_cpu_clock(&self) {
        cpu_clock_revert();
    }

    fn boost_cpu_clock(&self) {
        cpu_clock_boost();
    }

    fn enter_reconnecting_audio(&self) {
        AUDIO_CONTROL_SIGNAL.signal(AudioControl::Reconnecting);
    }

    fn abort_offline_audio(&self) {
        AUDIO_CONTROL_SIGNAL.signal(AudioControl::AbortOffline);
    }

    fn show(&self, state: UxState) {
        if let Ok(mut leds) = self.leds.lock() {
            leds.show(state);
        }
    }

    fn on_stage(&self, stage: RecoveryStage) {
        self.last_stage.store(stage.as_u8(), Ordering::Release);
        if let Some(state) = UxState::for_stage(stage) {
            self.show(state);
        }
    }
}

/// FreeRTOS task lookup by name
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeRtosTaskProbe;

impl TaskProbe for FreeRtosTaskProbe {
    fn is_running(&self, name: &str) -> bool {
        let Ok(name) = CString::new(name) else {
            return false;
        };
        let handle = unsafe { sys::xTaskGetHandle(name.as_ptr()) };
        !handle.is_null()
    }
}
