//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// An available output device, for host/UI selection lists
#[derive(Debug, Clone)]
pub struct OutputDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
}

/// List output devices across all available hosts
pub fn get_output_devices() -> Vec<OutputDevice> {
    let mut devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(outputs) = host.output_devices() else {
            continue;
        };
        let host_name = host_id.name().to_string();
        for device in outputs {
            let Ok(name) = device.name() else {
                continue;
            };
            devices.push(OutputDevice {
                id: DeviceId::with_host(&name, &host_name),
                name,
                host: host_name.clone(),
            });
        }
    }

    devices
}

/// The default output device of the default host
pub fn get_default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDevices)
}

/// Look up a device by identifier
///
/// Searches the named host when one is given, the default host otherwise.
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    let hosts: Vec<cpal::HostId> = match &id.host {
        Some(host_name) => cpal::available_hosts()
            .into_iter()
            .filter(|h| h.name() == host_name)
            .collect(),
        None => vec![cpal::default_host().id()],
    };

    for host_id in hosts {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut outputs) = host.output_devices() else {
            continue;
        };
        if let Some(device) =
            outputs.find(|d| d.name().map(|n| n == id.name).unwrap_or(false))
        {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.display_label()))
}
