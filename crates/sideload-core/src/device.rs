//! Device types for tracking attached Android hardware

use serde::{Deserialize, Serialize};

/// Unique identifier for a device, the serial reported by the device bridge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new DeviceId from a bridge serial string
    pub fn from_serial(serial: &str) -> Self {
        Self(serial.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state of a device as reported by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Connected and authorized for debugging
    Ok,
    /// Connected but waiting for the user to accept the debugging prompt
    UnAuthorized,
    /// Was connected but went offline
    Offline,
    /// Host lacks permission to talk to the device
    NoPermissions,
    /// Bridge reported a state we do not recognise
    Unknown,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl DeviceStatus {
    /// Map a bridge status token (second column of the device list).
    ///
    /// Returns `None` for tokens we do not recognise so the caller can log them.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        match token {
            "device" => Some(Self::Ok),
            "unauthorized" => Some(Self::UnAuthorized),
            "offline" => Some(Self::Offline),
            // adb appends a hint, e.g. "no permissions (user in plugdev group ...)"
            t if t.starts_with("no permissions") => Some(Self::NoPermissions),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::UnAuthorized => "Unauthorized",
            Self::Offline => "Offline",
            Self::NoPermissions => "No Permissions",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an attached device.
///
/// Devices are plain values: the registry replaces its whole list on every
/// change and callers always receive copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Bridge serial
    pub id: DeviceId,
    /// Product model, empty until the device is authorized
    pub model: String,
    /// Current connection state
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(id: DeviceId, model: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            id,
            model: model.into(),
            status,
        }
    }

    /// Whether the device accepts installs
    pub fn is_ready(&self) -> bool {
        self.status == DeviceStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_from_serial() {
        let id = DeviceId::from_serial("1WMHH000000000");
        assert_eq!(id.as_str(), "1WMHH000000000");
        assert_eq!(id.to_string(), "1WMHH000000000");
    }

    #[test]
    fn test_status_tokens() {
        assert_eq!(DeviceStatus::from_token("device"), Some(DeviceStatus::Ok));
        assert_eq!(
            DeviceStatus::from_token("unauthorized"),
            Some(DeviceStatus::UnAuthorized)
        );
        assert_eq!(DeviceStatus::from_token("offline"), Some(DeviceStatus::Offline));
        assert_eq!(
            DeviceStatus::from_token("no permissions (user in plugdev group; are your udev rules wrong?)"),
            Some(DeviceStatus::NoPermissions)
        );
        assert_eq!(DeviceStatus::from_token("recovery"), None);
    }

    #[test]
    fn test_device_equality_is_by_value() {
        let a = Device::new(DeviceId::from_serial("A"), "Quest 3", DeviceStatus::Ok);
        let b = Device::new(DeviceId::from_serial("A"), "Quest 3", DeviceStatus::Ok);
        let c = Device::new(DeviceId::from_serial("A"), "", DeviceStatus::UnAuthorized);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_ready());
        assert!(!c.is_ready());
    }
}
