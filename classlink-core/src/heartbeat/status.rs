//! `STATUS_UPDATE` payload.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// What the student is doing right now, as reported to the teacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceActivity {
    OnTask,
    HandRaised,
    Disconnected,
    Locked,
    #[default]
    Idle,
}

impl fmt::Display for DeviceActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OnTask => "ON_TASK",
            Self::HandRaised => "HAND_RAISED",
            Self::Disconnected => "DISCONNECTED",
            Self::Locked => "LOCKED",
            Self::Idle => "IDLE",
        };
        f.write_str(s)
    }
}

/// Snapshot produced by the status provider for each beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub device_id: String,
    pub status: DeviceActivity,
    /// Percent, 0..=100.
    pub battery_level: u8,
    pub current_material_id: Option<String>,
    pub student_view: Option<String>,
    pub last_updated: SystemTime,
}

impl DeviceStatus {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: DeviceActivity::Idle,
            battery_level: 0,
            current_material_id: None,
            student_view: None,
            last_updated: SystemTime::now(),
        }
    }
}

/// Wire shape of the JSON operand.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusPayload {
    #[serde(rename = "DeviceId")]
    pub device_id: String,
    #[serde(rename = "Status")]
    pub status: DeviceActivity,
    #[serde(rename = "BatteryLevel")]
    pub battery_level: u8,
    #[serde(rename = "CurrentMaterialId", skip_serializing_if = "Option::is_none", default)]
    pub current_material_id: Option<String>,
    #[serde(rename = "StudentView", skip_serializing_if = "Option::is_none", default)]
    pub student_view: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(rename = "Timestamp")]
    pub timestamp: u64,
}

impl StatusPayload {
    /// Sent when no provider is installed or the provider has nothing.
    pub fn unavailable() -> Self {
        Self {
            device_id: "unknown".to_owned(),
            status: DeviceActivity::Idle,
            battery_level: 0,
            current_material_id: None,
            student_view: None,
            timestamp: unix_seconds(SystemTime::now()),
        }
    }

    pub fn to_json(&self) -> Result<String, LinkError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&DeviceStatus> for StatusPayload {
    fn from(status: &DeviceStatus) -> Self {
        Self {
            device_id: status.device_id.clone(),
            status: status.status,
            battery_level: status.battery_level.min(100),
            current_material_id: status.current_material_id.clone(),
            student_view: status.student_view.clone(),
            timestamp: unix_seconds(status.last_updated),
        }
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
