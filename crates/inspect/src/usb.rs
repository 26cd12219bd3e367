//! Live device access through libusb
//!
//! Only endpoint 0 is used: the raw configuration descriptor, string
//! descriptors and class-specific control requests. Streaming needs a
//! transfer layer and is out of reach of this tool.

use anyhow::{Context as _, Result, bail};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, info};
use uvc_common::UsbId;
use uvc_driver::DeviceDescription;
use uvc_driver::transport::{ClassRequest, ControlTransport, StringFetcher};
use uvc_protocol::{CC_VIDEO, UsbError, UsbSpeed};

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
const CONFIG_HEADER_LEN: usize = 9;

/// Map rusb speed to the driver's speed
fn map_speed(speed: rusb::Speed) -> UsbSpeed {
    match speed {
        rusb::Speed::Low => UsbSpeed::Low,
        rusb::Speed::Full => UsbSpeed::Full,
        rusb::Speed::High => UsbSpeed::High,
        rusb::Speed::Super => UsbSpeed::Super,
        rusb::Speed::SuperPlus => UsbSpeed::SuperPlus,
        _ => UsbSpeed::Full,
    }
}

fn map_error(error: rusb::Error) -> UsbError {
    match error {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::NoMem => UsbError::NoResources,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        other => UsbError::Other {
            message: other.to_string(),
        },
    }
}

/// Endpoint 0 of an opened camera
pub struct UsbCamera {
    handle: DeviceHandle<Context>,
}

impl ControlTransport for UsbCamera {
    fn read(&self, request: &ClassRequest, buf: &mut [u8]) -> Result<usize, UsbError> {
        self.handle
            .read_control(
                request.request_type(),
                request.request as u8,
                request.value(),
                request.index(),
                buf,
                CONTROL_TIMEOUT,
            )
            .map_err(map_error)
    }

    fn write(&self, request: &ClassRequest, data: &[u8]) -> Result<(), UsbError> {
        let written = self
            .handle
            .write_control(
                request.request_type(),
                request.request as u8,
                request.value(),
                request.index(),
                data,
                CONTROL_TIMEOUT,
            )
            .map_err(map_error)?;
        if written != data.len() {
            return Err(UsbError::ShortTransfer {
                expected: data.len(),
                actual: written,
            });
        }
        Ok(())
    }
}

impl StringFetcher for UsbCamera {
    fn string(&self, index: u8) -> Option<String> {
        if index == 0 {
            return None;
        }
        self.handle.read_string_descriptor_ascii(index).ok()
    }
}

/// Video devices on the bus as (id, bus, address)
pub fn list_video_devices() -> Result<Vec<(UsbId, u8, u8)>> {
    let context = Context::new().context("Failed to initialise libusb")?;
    let mut found = Vec::new();
    for device in context.devices().context("Failed to list USB devices")?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                debug!("Skipping device {}:{}: {}", device.bus_number(), device.address(), e);
                continue;
            }
        };
        if has_video_interface(&device) {
            found.push((
                UsbId::new(descriptor.vendor_id(), descriptor.product_id()),
                device.bus_number(),
                device.address(),
            ));
        }
    }
    Ok(found)
}

fn has_video_interface(device: &Device<Context>) -> bool {
    let Ok(config) = device.active_config_descriptor() else {
        return false;
    };
    config.interfaces().any(|interface| {
        interface
            .descriptors()
            .any(|alt| alt.class_code() == CC_VIDEO)
    })
}

/// Open the first device matching `id` and read its active configuration
pub fn open(id: UsbId) -> Result<(DeviceDescription, UsbCamera)> {
    let context = Context::new().context("Failed to initialise libusb")?;
    let device = context
        .devices()
        .context("Failed to list USB devices")?
        .iter()
        .find(|d| {
            d.device_descriptor()
                .is_ok_and(|desc| desc.vendor_id() == id.vendor && desc.product_id() == id.product)
        })
        .with_context(|| format!("No device {} found", id))?;

    let handle = device
        .open()
        .with_context(|| format!("Failed to open {} (check permissions)", id))?;
    let raw = read_configuration(&device, &handle)?;
    let speed = map_speed(device.speed());
    info!(
        "Opened {} on bus {} address {} ({:?} speed), {} configuration bytes",
        id,
        device.bus_number(),
        device.address(),
        speed,
        raw.len()
    );

    let description = DeviceDescription::from_configuration(id, speed, &raw)
        .context("Failed to parse configuration descriptor")?;
    Ok((description, UsbCamera { handle }))
}

/// GET_DESCRIPTOR(CONFIGURATION) for the active configuration, full length
fn read_configuration(device: &Device<Context>, handle: &DeviceHandle<Context>) -> Result<Vec<u8>> {
    let active = handle
        .active_configuration()
        .context("Failed to read the active configuration")?;
    let descriptor = device.device_descriptor()?;
    let index = (0..descriptor.num_configurations())
        .find(|&i| device.config_descriptor(i).is_ok_and(|c| c.number() == active))
        .with_context(|| format!("Active configuration {} not found", active))?;

    let request_type = rusb::request_type(
        rusb::Direction::In,
        rusb::RequestType::Standard,
        rusb::Recipient::Device,
    );
    let value = (u16::from(rusb::constants::LIBUSB_DT_CONFIG) << 8) | u16::from(index);
    let get = |buf: &mut [u8]| {
        handle.read_control(
            request_type,
            rusb::constants::LIBUSB_REQUEST_GET_DESCRIPTOR,
            value,
            0,
            buf,
            CONTROL_TIMEOUT,
        )
    };

    let mut header = [0u8; CONFIG_HEADER_LEN];
    let n = get(&mut header).context("Failed to read configuration header")?;
    if n < 4 {
        bail!("Configuration header too short: {} bytes", n);
    }
    let total = u16::from_le_bytes([header[2], header[3]]) as usize;

    let mut raw = vec![0u8; total];
    let n = get(&mut raw).context("Failed to read configuration descriptor")?;
    raw.truncate(n);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_speed() {
        assert_eq!(map_speed(rusb::Speed::High), UsbSpeed::High);
        assert_eq!(map_speed(rusb::Speed::SuperPlus), UsbSpeed::SuperPlus);
        assert_eq!(map_speed(rusb::Speed::Unknown), UsbSpeed::Full);
    }

    #[test]
    fn test_map_error() {
        assert_eq!(map_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert!(matches!(map_error(rusb::Error::Busy), UsbError::Other { .. }));
    }
}
