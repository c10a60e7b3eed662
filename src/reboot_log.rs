// Reboot Log Module
// Last reset reason persisted across the restart so a stall reset can be diagnosed after boot

// Import logging macros for debug output
use log::{info, warn};

// Import Serde traits for JSON serialization
use serde::{Deserialize, Serialize};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

// Import time utilities for proper ISO 8601 timestamps
use chrono::{DateTime, Utc};

use crate::events::RecoveryStage;

/// What forced the last reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootRecord {
    pub reason: String,
    pub stage: Option<RecoveryStage>,
    pub timestamp: String, // RFC 3339 format
}

impl RebootRecord {
    pub fn new(reason: &str, stage: Option<RecoveryStage>) -> Self {
        Self {
            reason: reason.to_string(),
            stage,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("Failed to serialize reboot record: {}", e))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let record: RebootRecord = serde_json::from_str(json)
            .map_err(|e| anyhow!("Failed to parse reboot record: {}", e))?;
        record.recorded_at()?;
        Ok(record)
    }

    pub fn recorded_at(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| anyhow!("Invalid reboot timestamp {}: {}", self.timestamp, e))
    }
}

/// Persistent slot holding at most one reboot record
pub trait RebootLog {
    fn store(&mut self, record: &RebootRecord) -> Result<()>;

    /// Read and clear the stored record
    fn take(&mut self) -> Result<Option<RebootRecord>>;
}

/// Log the reason for the previous reset, if one was recorded, and clear it
pub fn report_previous_reboot<L: RebootLog>(log: &mut L) -> Option<RebootRecord> {
    match log.take() {
        Ok(Some(record)) => {
            warn!(
                "⚠️ Previous reset at {}: {} (stage {})",
                record.timestamp,
                record.reason,
                record.stage.map_or("none", RecoveryStage::label)
            );
            Some(record)
        }
        Ok(None) => {
            info!("✅ No recovery reset recorded before this boot");
            None
        }
        Err(e) => {
            warn!("⚠️ Could not read the reboot log: {}", e);
            None
        }
    }
}
