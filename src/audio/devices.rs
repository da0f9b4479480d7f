//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptor for one audio endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identifier accepted by [`DeviceSelection`] (the cpal device name).
    pub id: String,

    /// Display name with the host API label, e.g. `"USB Audio (ALSA)"`.
    pub name: String,

    /// Host API the device belongs to.
    pub host_api: String,
}

/// Output/input endpoint choice, applied on the next stream start.
/// `None` selects the system default.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelection {
    pub output: Option<String>,
    pub input: Option<String>,
}

/// Device enumeration and lookup errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no default {0} device available")]
    NoDefault(&'static str),

    #[error("failed to enumerate devices: {0}")]
    Enumeration(String),

    #[error("device not found: {0}")]
    NotFound(String),
}

enum Direction {
    Output,
    Input,
}

impl Direction {
    fn label(&self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

/// List every output endpoint across all available host APIs.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
    list_devices(Direction::Output)
}

/// List every input endpoint across all available host APIs.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
    list_devices(Direction::Input)
}

fn list_devices(direction: Direction) -> Result<Vec<DeviceInfo>, DeviceError> {
    let mut infos = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::warn!("skipping host {}: {}", host_id.name(), e);
                continue;
            }
        };

        let devices = match direction {
            Direction::Output => host.output_devices(),
            Direction::Input => host.input_devices(),
        }
        .map_err(|e| DeviceError::Enumeration(e.to_string()))?;

        for device in devices {
            let Ok(name) = device.name() else { continue };
            infos.push(DeviceInfo {
                id: name.clone(),
                name: format!("{} ({})", name, host_id.name()),
                host_api: host_id.name().to_string(),
            });
        }
    }

    log::debug!(
        "enumerated {} {} device(s)",
        infos.len(),
        direction.label()
    );
    Ok(infos)
}

/// Resolve an output device id, falling back to the system default.
pub fn find_output_device(id: Option<&str>) -> Result<Device, DeviceError> {
    find_device(Direction::Output, id)
}

/// Resolve an input device id, falling back to the system default.
pub fn find_input_device(id: Option<&str>) -> Result<Device, DeviceError> {
    find_device(Direction::Input, id)
}

fn find_device(direction: Direction, id: Option<&str>) -> Result<Device, DeviceError> {
    let Some(wanted) = id else {
        let host = cpal::default_host();
        let device = match direction {
            Direction::Output => host.default_output_device(),
            Direction::Input => host.default_input_device(),
        };
        return device.ok_or(DeviceError::NoDefault(direction.label()));
    };

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let devices = match direction {
            Direction::Output => host.output_devices(),
            Direction::Input => host.input_devices(),
        };
        let Ok(devices) = devices else { continue };
        for device in devices {
            if device.name().map(|n| n == wanted).unwrap_or(false) {
                return Ok(device);
            }
        }
    }

    Err(DeviceError::NotFound(wanted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_uses_system_devices() {
        let selection = DeviceSelection::default();
        assert!(selection.output.is_none());
        assert!(selection.input.is_none());
    }

    #[test]
    fn not_found_error_names_the_device() {
        let err = DeviceError::NotFound("Imaginary Interface".to_string());
        assert_eq!(err.to_string(), "device not found: Imaginary Interface");
    }

    #[test]
    fn display_name_carries_the_host_api_label() {
        let info = DeviceInfo {
            id: "USB Audio".to_string(),
            name: format!("{} ({})", "USB Audio", "ALSA"),
            host_api: "ALSA".to_string(),
        };
        assert_eq!(info.name, "USB Audio (ALSA)");
        assert_eq!(info.id, "USB Audio");
    }
}
