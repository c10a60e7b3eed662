// NVS Storage Module
// Registration record, reboot log and configuration, each as a JSON string in its own namespace

// Import ESP-IDF's NVS (Non-Volatile Storage) functionality
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

// Import logging macros for debug output
use log::{info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use crate::config::VoxlinkConfig;
use crate::drivers::{CredentialStore, RegistrationRecord};
use crate::reboot_log::{RebootLog, RebootRecord};

// NVS namespaces and keys
const REGISTRATION_NAMESPACE: &str = "ais_reg"; // Voice service registration
const REGISTRATION_KEY: &str = "registration";
const REBOOT_NAMESPACE: &str = "reboot_log"; // Last recovery reset
const REBOOT_KEY: &str = "last_reset";
const CONFIG_NAMESPACE: &str = "voxlink_cfg"; // Tunables document
const CONFIG_KEY: &str = "config";

// Read buffer sizes
const REGISTRATION_BUF_SIZE: usize = 1024;
const REBOOT_BUF_SIZE: usize = 256;
const CONFIG_BUF_SIZE: usize = 2048;

fn open_namespace(partition: EspDefaultNvsPartition, namespace: &str) -> Result<EspNvs<NvsDefault>> {
    EspNvs::new(partition, namespace, true)
        .map_err(|e| anyhow!("Failed to open {} NVS namespace: {}", namespace, e))
}

/// Registration record written at provisioning time
pub struct NvsCredentialStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsCredentialStore {
    pub fn new_with_partition(partition: EspDefaultNvsPartition) -> Result<Self> {
        Ok(Self {
            nvs: open_namespace(partition, REGISTRATION_NAMESPACE)?,
        })
    }

    pub fn store_registration(&mut self, record: &RegistrationRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| anyhow!("Failed to serialize registration: {}", e))?;
        self.nvs
            .set_str(REGISTRATION_KEY, &json)
            .map_err(|e| anyhow!("Failed to store registration: {}", e))?;
        info!("💾 Voice registration stored for {}", record.client_id);
        Ok(())
    }
}

impl CredentialStore for NvsCredentialStore {
    fn load_registration(&mut self) -> Result<RegistrationRecord> {
        let mut buf = [0u8; REGISTRATION_BUF_SIZE];
        let json = self
            .nvs
            .get_str(REGISTRATION_KEY, &mut buf)
            .map_err(|e| anyhow!("Failed to read registration: {}", e))?
            .ok_or_else(|| anyhow!("No voice registration stored"))?;

        serde_json::from_str(json).map_err(|e| anyhow!("Corrupt registration record: {}", e))
    }
}

/// Single-slot log of the last recovery reset
pub struct NvsRebootLog {
    nvs: EspNvs<NvsDefault>,
}

impl NvsRebootLog {
    pub fn new_with_partition(partition: EspDefaultNvsPartition) -> Result<Self> {
        Ok(Self {
            nvs: open_namespace(partition, REBOOT_NAMESPACE)?,
        })
    }
}

impl RebootLog for NvsRebootLog {
    fn store(&mut self, record: &RebootRecord) -> Result<()> {
        self.nvs
            .set_str(REBOOT_KEY, &record.to_json()?)
            .map_err(|e| anyhow!("Failed to store reboot record: {}", e))?;
        Ok(())
    }

    fn take(&mut self) -> Result<Option<RebootRecord>> {
        let mut buf = [0u8; REBOOT_BUF_SIZE];
        let record = match self
            .nvs
            .get_str(REBOOT_KEY, &mut buf)
            .map_err(|e| anyhow!("Failed to read reboot record: {}", e))?
        {
            Some(json) => Some(RebootRecord::from_json(json)?),
            None => None,
        };

        if record.is_some() {
            self.nvs
                .remove(REBOOT_KEY)
                .map_err(|e| anyhow!("Failed to clear reboot record: {}", e))?;
        }
        Ok(record)
    }
}

/// Load the tunables document, falling back to defaults when it is missing or invalid
pub fn load_config(partition: EspDefaultNvsPartition) -> VoxlinkConfig {
    let nvs = match open_namespace(partition, CONFIG_NAMESPACE) {
        Ok(nvs) => nvs,
        Err(e) => {
            warn!("⚠️ {}, using default configuration", e);
            return VoxlinkConfig::default();
        }
    };

    let mut buf = [0u8; CONFIG_BUF_SIZE];
    match nvs.get_str(CONFIG_KEY, &mut buf) {
        Ok(Some(json)) => match VoxlinkConfig::from_json(json) {
            Ok(config) => {
                info!("✅ Loaded stored configuration");
                config
            }
            Err(e) => {
                warn!("⚠️ Stored configuration rejected: {}", e);
                VoxlinkConfig::default()
            }
        },
        Ok(None) => {
            info!("📋 No stored configuration, using defaults");
            VoxlinkConfig::default()
        }
        Err(e) => {
            warn!("⚠️ Failed to read configuration: {}", e);
            VoxlinkConfig::default()
        }
    }
}
