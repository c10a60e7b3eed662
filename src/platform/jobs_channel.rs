// OTA Jobs Channel Module
// Subscribes the OTA agent to job notifications on the shared broker connection

// Import ESP-IDF MQTT client types
use esp_idf_svc::mqtt::client::QoS;

// Import logging macros with consistent emoji prefixes
use log::info;

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use crate::drivers::OtaChannel;
use crate::platform::mqtt_transport::SharedMqttClient;

/// AWS IoT Jobs notifications, the OTA agent's view of the broker connection
pub struct MqttJobsChannel {
    client: SharedMqttClient,
    topic: String,
}

impl MqttJobsChannel {
    pub fn new(client: SharedMqttClient, thing_name: &str) -> Self {
        Self {
            client,
            topic: format!("$aws/things/{}/jobs/notify-next", thing_name),
        }
    }
}

impl OtaChannel for MqttJobsChannel {
    async fn disconnect(&mut self) -> Result<()> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| anyhow!("MQTT client lock poisoned"))?;

        // Nothing to undo once the transport dropped the client
        if let Some(client) = guard.as_mut() {
            client
                .unsubscribe(&self.topic)
                .map_err(|e| anyhow!("Failed to unsubscribe {}: {:?}", self.topic, e))?;
            info!("📭 Unsubscribed from {}", self.topic);
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| anyhow!("MQTT client lock poisoned"))?;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("MQTT client not connected"))?;

        client
            .subscribe(&self.topic, QoS::AtLeastOnce)
            .map_err(|e| anyhow!("Failed to subscribe {}: {:?}", self.topic, e))?;
        info!("📬 Subscribed to {}", self.topic);
        Ok(())
    }
}
