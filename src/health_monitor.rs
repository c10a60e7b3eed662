// Network Health Monitor Module
// Periodically checks that the network receive task is still alive
// A receive task that dies quietly leaves the MQTT connection looking healthy while nothing arrives

use log::{info, warn};

use crate::config::HealthConfig;
use crate::drivers::TaskProbe;
use crate::events::{ReconnectEvent, RecoveryStage};
use crate::system_state::ReconnectShared;
use crate::time::TimeSource;

/// Result of one liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Alive,                       // Task present, miss counter cleared
    Missing { consecutive: u8 }, // Task absent while Idle, below the threshold
    Deferred,                    // Task absent but recovery is already running
    ReconnectRaised,             // Threshold hit and the controller took the event
    RaiseRejected,               // Threshold hit but another event won the race
}

/// Liveness probe of the background network receive task
pub struct NetworkHealthMonitor<'a, P> {
    shared: &'a ReconnectShared<'a>,
    probe: P,
    config: HealthConfig,
    consecutive_misses: u8,
}

impl<'a, P: TaskProbe> NetworkHealthMonitor<'a, P> {
    pub fn new(shared: &'a ReconnectShared<'a>, probe: P, config: HealthConfig) -> Self {
        Self {
            shared,
            probe,
            config,
            consecutive_misses: 0,
        }
    }

    pub fn consecutive_misses(&self) -> u8 {
        self.consecutive_misses
    }

    /// One probe of the receive task
    pub fn check(&mut self) -> HealthVerdict {
        if self.probe.is_running(&self.config.task_name) {
            self.consecutive_misses = 0;
            return HealthVerdict::Alive;
        }

        if self.shared.current_stage() != RecoveryStage::Idle {
            self.consecutive_misses = 0;
            return HealthVerdict::Deferred;
        }

        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if self.consecutive_misses < self.config.consecutive_misses {
            warn!(
                "⚠️ Network task {} missing ({}/{})",
                self.config.task_name, self.consecutive_misses, self.config.consecutive_misses
            );
            return HealthVerdict::Missing {
                consecutive: self.consecutive_misses,
            };
        }

        self.consecutive_misses = 0;
        // A probe re-arm left over from an earlier cycle must not resume us early
        self.shared.clear_liveness();

        if self.shared.raise_event(ReconnectEvent::TransportDisconnect) {
            warn!(
                "⚠️ Network task {} is gone, forcing a transport reconnect",
                self.config.task_name
            );
            HealthVerdict::ReconnectRaised
        } else {
            HealthVerdict::RaiseRejected
        }
    }

    /// Poll forever. After raising a reconnect the monitor sleeps until the controller
    /// re-arms the probe at LinkUp.
    pub async fn run<T: TimeSource>(&mut self, time: &T) {
        info!(
            "🩺 Network health monitor started for task {}",
            self.config.task_name
        );

        loop {
            time.sleep(self.config.period()).await;

            if self.check() == HealthVerdict::ReconnectRaised {
                info!("🩺 Health monitor suspended until the connection is back");
                self.shared.wait_liveness_rearm().await;
                info!("🩺 Health monitor resumed");
            }
        }
    }
}
