//! Interface to Apple's `xcrun simctl` command-line tool.
//!
//! Used to list simulator devices so a run can be pointed at a UDID or a
//! device name.
//!
//! # Example
//!
//! ```no_run
//! use xcarm_core::simctl::Simctl;
//!
//! for device in Simctl::list_devices().unwrap() {
//!     println!("{}: {} ({})", device.name, device.udid, device.state);
//! }
//! ```

use std::collections::HashMap;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with simctl.
#[derive(Error, Debug)]
pub enum SimctlError {
    /// A simctl command failed to execute successfully.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Failed to parse JSON output from simctl.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An I/O error occurred while executing the command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An iOS Simulator device as reported by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    pub udid: String,

    /// Human-readable name, e.g. "iPhone 15 Pro". This is what `name=` matches.
    pub name: String,

    /// "Booted", "Shutdown", ...
    pub state: String,

    #[serde(rename = "isAvailable", default = "default_available")]
    pub is_available: bool,

    /// Runtime identifier the device belongs to. Filled in from the JSON map key.
    #[serde(default)]
    pub runtime: String,
}

fn default_available() -> bool {
    true
}

impl SimulatorDevice {
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: HashMap<String, Vec<SimulatorDevice>>,
}

/// Wrapper for `xcrun simctl` commands.
pub struct Simctl;

impl Simctl {
    /// Lists all available simulator devices, sorted by runtime then name.
    ///
    /// # Errors
    ///
    /// - [`SimctlError::Io`] if the command fails to execute
    /// - [`SimctlError::CommandFailed`] if simctl returns a non-zero exit code
    /// - [`SimctlError::JsonParse`] if the output cannot be parsed as JSON
    pub fn list_devices() -> Result<Vec<SimulatorDevice>, SimctlError> {
        let output = Command::new("xcrun")
            .args(["simctl", "list", "devices", "-j"])
            .output()?;

        if !output.status.success() {
            return Err(SimctlError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Self::parse_device_list(&output.stdout)
    }

    /// Parses `simctl list devices -j` output into a flat list.
    ///
    /// Unavailable devices are skipped.
    pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, SimctlError> {
        let device_list: DeviceList = serde_json::from_slice(json)?;
        let mut devices: Vec<SimulatorDevice> = device_list
            .devices
            .into_iter()
            .flat_map(|(runtime, devices)| {
                devices.into_iter().map(move |mut device| {
                    device.runtime = runtime.clone();
                    device
                })
            })
            .filter(|d| d.is_available)
            .collect();
        devices.sort_by(|a, b| a.runtime.cmp(&b.runtime).then_with(|| a.name.cmp(&b.name)));
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DEVICE_LIST: &str = r#"{
        "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
                {
                    "udid": "A1B2C3D4-E5F6-7890-ABCD-EF1234567890",
                    "name": "iPhone 15 Pro",
                    "state": "Booted",
                    "isAvailable": true
                },
                {
                    "udid": "B2C3D4E5-F6A7-8901-BCDE-F12345678901",
                    "name": "iPhone 15",
                    "state": "Shutdown",
                    "isAvailable": true
                }
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
                {
                    "udid": "C3D4E5F6-A7B8-9012-CDEF-123456789012",
                    "name": "iPhone 14",
                    "state": "Shutdown",
                    "isAvailable": false
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_device_list_success() {
        let devices = Simctl::parse_device_list(SAMPLE_DEVICE_LIST.as_bytes())
            .expect("Should parse valid JSON");

        // The unavailable iPhone 14 is dropped
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "iPhone 15");
        assert_eq!(devices[1].name, "iPhone 15 Pro");
        assert_eq!(devices[0].runtime, "com.apple.CoreSimulator.SimRuntime.iOS-17-0");
    }

    #[test]
    fn test_parse_device_list_empty() {
        let devices = Simctl::parse_device_list(br#"{"devices": {}}"#).unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_parse_device_list_invalid_json() {
        match Simctl::parse_device_list(b"not valid json") {
            Err(SimctlError::JsonParse(_)) => {}
            other => panic!("Expected JsonParse error, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_is_available_defaults_true() {
        let json = br#"{"devices": {"rt": [{"udid": "X", "name": "iPad", "state": "Shutdown"}]}}"#;
        let devices = Simctl::parse_device_list(json).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_available);
    }

    #[test]
    fn test_is_booted() {
        let devices = Simctl::parse_device_list(SAMPLE_DEVICE_LIST.as_bytes()).unwrap();
        let booted: Vec<_> = devices.iter().filter(|d| d.is_booted()).collect();
        assert_eq!(booted.len(), 1);
        assert_eq!(booted[0].udid, "A1B2C3D4-E5F6-7890-ABCD-EF1234567890");
    }
}
