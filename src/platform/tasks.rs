// Embassy task wrappers for the recovery background loops
// Spawned by the board application together with its reconnect controller task

// Import logging macros with consistent emoji prefixes
use log::{error, info};

use crate::config::HealthConfig;
use crate::drivers::{ClientState, VoiceSession};
use crate::health_monitor::NetworkHealthMonitor;
use crate::reconnect_manager::ReconnectionController;
use crate::system_state::ReconnectShared;
use crate::time::EmbassyTime;
use crate::watchdog::WatchdogBank;

use super::board::{EspBoardHooks, FreeRtosTaskProbe};
use super::jobs_channel::MqttJobsChannel;
use super::mqtt_transport::EspMqttTransport;
use super::nvs_store::NvsCredentialStore;
use super::wifi_link::EspWifiLink;

/// Controller wired to the ESP-IDF drivers. The voice session and client state come from the
/// board application.
pub type DeviceController<V, S> = ReconnectionController<
    'static,
    EspWifiLink,
    EspMqttTransport,
    MqttJobsChannel,
    V,
    NvsCredentialStore,
    S,
    EmbassyTime,
    EspBoardHooks,
>;

/// Body of the controller task. Embassy tasks cannot be generic, so the board application wraps
/// this in its own task with its concrete session types:
///
/// ```ignore
/// #[embassy_executor::task]
/// async fn reconnect_task(controller: &'static mut DeviceController<AvsSession, AppState>) {
///     run_reconnect_controller(controller).await;
/// }
/// ```
pub async fn run_reconnect_controller<V, S>(controller: &mut DeviceController<V, S>)
where
    V: VoiceSession,
    S: ClientState,
{
    info!("🔁 Reconnect task started at stage {}", controller.current_stage());
    controller.run().await;
    // Only reached if the restart call came back
    error!("❌ Reconnect task stopped without a reset");
}

#[embassy_executor::task]
pub async fn watchdog_task(
    bank: &'static WatchdogBank,
    shared: &'static ReconnectShared<'static>,
    hooks: &'static EspBoardHooks,
) {
    let stage = bank.run(shared, &EmbassyTime, hooks).await;
    // Only reached if the restart call came back
    error!("❌ Watchdog reset for {} did not take effect", stage);
}

#[embassy_executor::task]
pub async fn health_monitor_task(shared: &'static ReconnectShared<'static>, config: HealthConfig) {
    let mut monitor = NetworkHealthMonitor::new(shared, FreeRtosTaskProbe, config);
    monitor.run(&EmbassyTime).await;
}
