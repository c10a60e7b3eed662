// MQTT Transport Module
// AWS IoT broker connection with X.509 mutual TLS, rebuilt from scratch on every reconnect
// The connection event pump runs in its own "NetRecv" task so the health monitor can probe it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// Import ESP-IDF MQTT client and TLS types
use esp_idf_svc::hal::task::thread::ThreadSpawnConfiguration;
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration, QoS,
};
use esp_idf_svc::tls::X509;

// Import Embassy time utilities
use embassy_time::{Duration, Instant, Timer};

// Import logging macros with consistent emoji prefixes
use log::{debug, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use crate::drivers::TransportDriver;
use crate::events::ReconnectEvent;
use crate::system_state::ReconnectShared;

// Connection constants
const MQTT_PORT: u16 = 8883; // AWS IoT MQTT over TLS
const MQTT_KEEP_ALIVE_SECS: u64 = 60;
const MQTT_NETWORK_TIMEOUT_SECS: u64 = 30;
const MQTT_CONNECT_TIMEOUT_SECS: u64 = 30; // Wait for CONNACK after the client is created
const MQTT_CONNECT_POLL_MS: u64 = 250;
const NET_RECV_TASK_NAME: &[u8] = b"NetRecv\0"; // Probed by the network health monitor
const NET_RECV_STACK_SIZE: usize = 6 * 1024;

/// Broker client shared between the transport and the OTA jobs channel
pub type SharedMqttClient = Arc<Mutex<Option<EspMqttClient<'static>>>>;

/// Device identity for the AWS IoT broker
#[derive(Debug, Clone)]
pub struct MqttCredentials {
    pub endpoint: String,
    pub client_id: String,
    pub thing_name: String,
    pub device_certificate: String,
    pub private_key: String,
    pub root_ca: String,
}

/// Convert PEM text to an X.509 handle with static lifetime.
/// Leaks the buffer, so call once per certificate at startup.
fn convert_pem_to_x509(pem: &str) -> Result<X509<'static>> {
    use std::ffi::CString;

    let c_string =
        CString::new(pem).map_err(|e| anyhow!("PEM certificate contains null bytes: {}", e))?;
    let static_cstr: &'static std::ffi::CStr = Box::leak(c_string.into_boxed_c_str());
    Ok(X509::pem(static_cstr))
}

/// MQTT transport driver
pub struct EspMqttTransport {
    credentials: MqttCredentials,
    device_cert: X509<'static>,
    private_key: X509<'static>,
    root_ca: X509<'static>,
    client: SharedMqttClient,
    connected: Arc<AtomicBool>,
    shared: &'static ReconnectShared<'static>,
}

impl EspMqttTransport {
    pub fn new(
        credentials: MqttCredentials,
        shared: &'static ReconnectShared<'static>,
    ) -> Result<Self> {
        info!("🔐 Preparing MQTT transport for {}", credentials.client_id);
        let device_cert = convert_pem_to_x509(&credentials.device_certificate)?;
        let private_key = convert_pem_to_x509(&credentials.private_key)?;
        let root_ca = convert_pem_to_x509(&credentials.root_ca)?;

        Ok(Self {
            credentials,
            device_cert,
            private_key,
            root_ca,
            client: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shared,
        })
    }

    /// Handle for other channels riding on the same broker connection
    pub fn client(&self) -> SharedMqttClient {
        Arc::clone(&self.client)
    }

    pub fn thing_name(&self) -> &str {
        &self.credentials.thing_name
    }

    fn spawn_event_pump(&self, mut connection: EspMqttConnection) -> Result<()> {
        let connected = Arc::clone(&self.connected);
        let shared = self.shared;

        ThreadSpawnConfiguration {
            name: Some(NET_RECV_TASK_NAME),
            stack_size: NET_RECV_STACK_SIZE,
            ..Default::default()
        }
        .set()?;

        let spawned = std::thread::Builder::new()
            .stack_size(NET_RECV_STACK_SIZE)
            .spawn(move || {
                while let Ok(event) = connection.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => {
                            connected.store(true, Ordering::Release);
                            info!("🔗 MQTT connected");
                        }
                        EventPayload::Disconnected => {
                            connected.store(false, Ordering::Release);
                            if shared.raise_event(ReconnectEvent::TransportDisconnect) {
                                warn!("⚠️ MQTT connection dropped");
                            }
                        }
                        EventPayload::Received { topic, data, .. } => {
                            debug!("📨 {} bytes on {:?}", data.len(), topic);
                        }
                        _ => {}
                    }
                }
                info!("🔌 MQTT event pump finished");
            });

        ThreadSpawnConfiguration::default().set()?;
        spawned.map_err(|e| anyhow!("Failed to spawn MQTT event pump: {}", e))?;
        Ok(())
    }
}

impl TransportDriver for EspMqttTransport {
    async fn disconnect(&mut self) -> Result<()> {
        let client = self
            .client
            .lock()
            .map_err(|_| anyhow!("MQTT client lock poisoned"))?
            .take();

        // Dropping the client closes the socket and ends the event pump
        if client.is_some() {
            info!("🔌 Closing MQTT connection");
        }
        drop(client);
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let broker_url = format!("mqtts://{}:{}", self.credentials.endpoint, MQTT_PORT);
        info!("🔌 Connecting to {}", broker_url);

        let mqtt_config = MqttClientConfiguration {
            client_id: Some(&self.credentials.client_id),
            client_certificate: Some(self.device_cert),
            private_key: Some(self.private_key),
            server_certificate: Some(self.root_ca),
            keep_alive_interval: Some(std::time::Duration::from_secs(MQTT_KEEP_ALIVE_SECS)),
            network_timeout: std::time::Duration::from_secs(MQTT_NETWORK_TIMEOUT_SECS),
            use_global_ca_store: false,
            skip_cert_common_name_check: false,
            ..Default::default()
        };

        let (client, connection) = EspMqttClient::new(&broker_url, &mqtt_config)
            .map_err(|e| anyhow!("Failed to create MQTT client: {:?}", e))?;

        self.connected.store(false, Ordering::Release);
        self.spawn_event_pump(connection)?;
        *self
            .client
            .lock()
            .map_err(|_| anyhow!("MQTT client lock poisoned"))? = Some(client);

        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(MQTT_CONNECT_TIMEOUT_SECS) {
            if self.connected.load(Ordering::Acquire) {
                return Ok(());
            }
            Timer::after(Duration::from_millis(MQTT_CONNECT_POLL_MS)).await;
        }

        Err(anyhow!(
            "No CONNACK within {}s",
            MQTT_CONNECT_TIMEOUT_SECS
        ))
    }

    async fn resync_state(&mut self) -> Result<()> {
        let topic = format!("$aws/things/{}/shadow/get", self.credentials.thing_name);
        let mut guard = self
            .client
            .lock()
            .map_err(|_| anyhow!("MQTT client lock poisoned"))?;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("MQTT client not connected"))?;

        client
            .publish(&topic, QoS::AtLeastOnce, false, b"")
            .map_err(|e| anyhow!("Failed to request shadow on {}: {:?}", topic, e))?;
        info!("📤 Shadow document requested");
        Ok(())
    }
}
