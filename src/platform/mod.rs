// ESP-IDF implementations of the driver traits
// Only built for the device target; host builds and tests use the portable modules alone

pub mod board;
pub mod jobs_channel;
pub mod mqtt_transport;
pub mod nvs_store;
pub mod tasks;
pub mod wifi_link;

pub use board::{EspBoardHooks, FreeRtosTaskProbe, StatusLeds, RECONNECT};
pub use jobs_channel::MqttJobsChannel;
pub use mqtt_transport::{EspMqttTransport, MqttCredentials, SharedMqttClient};
pub use nvs_store::{load_config, NvsCredentialStore, NvsRebootLog};
pub use tasks::{run_reconnect_controller, DeviceController};
pub use wifi_link::EspWifiLink;

use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};

use crate::config::VoxlinkConfig;
use crate::reboot_log::report_previous_reboot;

/// Boot-time setup shared by every board application: runtime patches, logger, CPU boost lock
/// and the report of the last recovery reset. Returns the stored configuration.
pub fn init(partition: EspDefaultNvsPartition) -> VoxlinkConfig {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("🚀 voxlink starting");

    if let Err(e) = board::init_cpu_boost() {
        warn!("⚠️ CPU boost unavailable: {}", e);
    }

    match NvsRebootLog::new_with_partition(partition.clone()) {
        Ok(mut log) => {
            report_previous_reboot(&mut log);
        }
        Err(e) => warn!("⚠️ {}", e),
    }

    load_config(partition)
}
