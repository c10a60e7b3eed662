// Import Embassy time utilities for async delays
use embassy_time::{Duration, Instant, Timer};

// Import WiFi-related types from ESP-IDF
// - BlockingWifi: Synchronous WiFi operations wrapper
// - EspWifi: Low-level WiFi driver, used for the non-blocking connect
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

// Import logging macros
use log::{error, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use std::net::Ipv4Addr;

use crate::drivers::LinkDriver;

// Link recovery constants
const LINK_CONNECT_ATTEMPTS: u32 = 3; // Station connect attempts before giving up
const LINK_ATTEMPT_TIMEOUT_SECS: u64 = 10; // Wait for association and DHCP per attempt
const LINK_RETRY_PAUSE_SECS: u64 = 2; // Pause between attempts
const LINK_POLL_INTERVAL_MS: u64 = 500; // How often to check association state

/// WiFi station link. The station configuration is already applied by provisioning.
pub struct EspWifiLink {
    wifi: BlockingWifi<EspWifi<'static>>,
    attempts: u32,
    attempt_timeout: Duration,
}

impl EspWifiLink {
    pub fn new(wifi: BlockingWifi<EspWifi<'static>>) -> Self {
        Self {
            wifi,
            attempts: LINK_CONNECT_ATTEMPTS,
            attempt_timeout: Duration::from_secs(LINK_ATTEMPT_TIMEOUT_SECS),
        }
    }

    async fn try_connect(&mut self) -> Result<Ipv4Addr> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }

        // A half-dead association has to be dropped before the driver will retry
        if self.wifi.is_connected()? {
            self.wifi.wifi_mut().disconnect()?;
        }
        self.wifi.wifi_mut().connect()?;

        let started = Instant::now();
        while started.elapsed() < self.attempt_timeout {
            if self.wifi.is_connected()? && self.wifi.is_up()? {
                let ip_info = self.wifi.wifi().sta_netif().get_ip_info()?;
                return Ok(ip_info.ip);
            }
            Timer::after(Duration::from_millis(LINK_POLL_INTERVAL_MS)).await;
        }

        Err(anyhow!(
            "no IP after {}s",
            self.attempt_timeout.as_secs()
        ))
    }
}

impl LinkDriver for EspWifiLink {
    async fn reconnect(&mut self) -> Result<()> {
        for attempt in 1..=self.attempts {
            info!("📶 WiFi reconnect attempt {} of {}", attempt, self.attempts);
            match self.try_connect().await {
                Ok(ip) => {
                    info!("✅ WiFi link restored, IP: {}", ip);
                    return Ok(());
                }
                Err(e) => {
                    warn!("⚠️ WiFi reconnect attempt {} failed: {}", attempt, e);
                    if attempt < self.attempts {
                        Timer::after(Duration::from_secs(LINK_RETRY_PAUSE_SECS)).await;
                    }
                }
            }
        }

        error!("❌ All WiFi reconnect attempts failed");
        Err(anyhow!(
            "WiFi link not restored after {} attempts",
            self.attempts
        ))
    }
}
