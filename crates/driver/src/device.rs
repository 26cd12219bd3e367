//! Device function: descriptors, attach and teardown
//!
//! [`DeviceDescription`] is what enumeration hands over: the device id, its
//! speed and the interfaces of the active configuration with their
//! class-specific bytes. [`UvcDevice::attach`] builds the entity graph, the
//! video chains, the control registry and one [`VideoStream`] per streaming
//! interface from it.

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uvc_common::{DriverConfig, Error, Quirks, Result, UsbId};
use uvc_protocol::constants::{descriptor_type, subclass};
use uvc_protocol::{CC_VIDEO, DescriptorIter, UsbSpeed, UvcVersion};

use crate::chain::{Chain, describe, scan_chains};
use crate::control::ControlRegistry;
use crate::entity::{ControlInterface, EntityArena, parse_control_interface};
use crate::quirks::quirks_for;
use crate::streaming::{QueuePool, StreamParams, StreamSettings, StreamState, StreamingInterface, VideoStream};
use crate::transport::{ControlTransport, EndpointConfig, StringFetcher, TransferLayer};

/// SuperSpeed endpoint companion descriptor
const SS_ENDPOINT_COMPANION: u8 = 0x30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDescription {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    /// wBytesPerInterval of the SuperSpeed companion, when present
    pub bytes_per_interval: Option<u16>,
}

impl EndpointDescription {
    pub fn config(&self) -> EndpointConfig {
        EndpointConfig {
            address: self.address,
            attributes: self.attributes,
            max_packet_size: self.max_packet_size,
            interval: self.interval,
        }
    }

    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }

    pub fn is_isochronous(&self) -> bool {
        self.attributes & 0x03 == 1
    }

    pub fn is_bulk(&self) -> bool {
        self.attributes & 0x03 == 2
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDescription {
    pub number: u8,
    pub alternate: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointDescription>,
    /// Descriptors following the interface descriptor that are neither
    /// interface nor endpoint descriptors
    #[serde(skip)]
    pub extra: Vec<u8>,
}

impl InterfaceDescription {
    pub fn is_video_control(&self) -> bool {
        self.class == CC_VIDEO && self.subclass == subclass::VIDEO_CONTROL
    }

    pub fn is_video_streaming(&self) -> bool {
        self.class == CC_VIDEO && self.subclass == subclass::VIDEO_STREAMING
    }
}

/// Enumeration result for one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescription {
    pub id: UsbId,
    pub speed: UsbSpeed,
    pub interfaces: Vec<InterfaceDescription>,
}

impl DeviceDescription {
    /// Split a full configuration descriptor into interfaces and endpoints
    pub fn from_configuration(id: UsbId, speed: UsbSpeed, data: &[u8]) -> Result<Self> {
        let mut interfaces: Vec<InterfaceDescription> = Vec::new();

        for desc in DescriptorIter::new(data) {
            let desc = desc?;
            match desc.descriptor_type {
                descriptor_type::INTERFACE => {
                    let r = desc.reader("interface descriptor");
                    r.require(9)?;
                    interfaces.push(InterfaceDescription {
                        number: r.u8_at(2)?,
                        alternate: r.u8_at(3)?,
                        class: r.u8_at(5)?,
                        subclass: r.u8_at(6)?,
                        protocol: r.u8_at(7)?,
                        endpoints: Vec::new(),
                        extra: Vec::new(),
                    });
                }
                descriptor_type::ENDPOINT => {
                    let r = desc.reader("endpoint descriptor");
                    r.require(7)?;
                    let Some(interface) = interfaces.last_mut() else {
                        debug!("Endpoint descriptor outside an interface at offset {}", desc.offset);
                        continue;
                    };
                    interface.endpoints.push(EndpointDescription {
                        address: r.u8_at(2)?,
                        attributes: r.u8_at(3)?,
                        max_packet_size: r.u16_at(4)?,
                        interval: r.u8_at(6)?,
                        bytes_per_interval: None,
                    });
                }
                SS_ENDPOINT_COMPANION => {
                    let r = desc.reader("SuperSpeed endpoint companion");
                    r.require(6)?;
                    if let Some(ep) = interfaces.last_mut().and_then(|i| i.endpoints.last_mut()) {
                        ep.bytes_per_interval = Some(r.u16_at(4)?);
                    }
                }
                _ => {
                    if let Some(interface) = interfaces.last_mut() {
                        interface.extra.extend_from_slice(desc.bytes);
                    }
                }
            }
        }

        Ok(Self { id, speed, interfaces })
    }

    /// Every alternate setting of interface `number`
    pub fn alt_settings(&self, number: u8) -> Vec<&InterfaceDescription> {
        self.interfaces
            .iter()
            .filter(|i| i.number == number)
            .collect()
    }

    pub fn video_control(&self) -> Option<&InterfaceDescription> {
        self.interfaces
            .iter()
            .find(|i| i.is_video_control() && i.alternate == 0)
    }
}

/// A bound UVC function
pub struct UvcDevice {
    description: DeviceDescription,
    control_interface: u8,
    info: ControlInterface,
    chains: Vec<Chain>,
    quirks: Quirks,
    registry: Mutex<ControlRegistry>,
    streams: Vec<Arc<VideoStream>>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for UvcDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UvcDevice")
            .field("id", &self.description.id)
            .field("version", &self.info.version)
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl UvcDevice {
    /// Bind the driver to an enumerated device
    ///
    /// Streaming interfaces that fail to parse are skipped with a warning;
    /// a device left without any stream is not supported.
    pub fn attach(
        description: DeviceDescription,
        control: Arc<dyn ControlTransport>,
        transfers: Arc<dyn TransferLayer>,
        strings: &dyn StringFetcher,
        pool: Arc<QueuePool>,
        config: &DriverConfig,
    ) -> Result<Self> {
        let vc = description
            .video_control()
            .ok_or_else(|| Error::NotSupported(format!("{} has no video control interface", description.id)))?;
        let control_interface = vc.number;

        let quirks = quirks_for(description.id, &config.quirk_overrides()?);
        if !quirks.is_empty() {
            info!("Device {}: applying quirks {:?}", description.id, quirks);
        }

        let info = parse_control_interface(&vc.extra, strings)?;
        let chains = scan_chains(&info.entities)?;
        for chain in &chains {
            debug!("Device {}: chain {}", description.id, describe(&info.entities, chain));
        }

        let mut registry = ControlRegistry::new(
            Arc::clone(&control),
            control_interface,
            description.id,
            &info.entities,
        );
        if quirks.contains(Quirks::RESTORE_CTRLS_ON_INIT) {
            registry.restore_defaults();
        }

        let params = StreamParams {
            version: info.version,
            clock_frequency: info.clock_frequency,
            speed: description.speed,
            quirks,
        };
        let settings = StreamSettings::from(config);

        let mut streams = Vec::new();
        for &number in &info.streaming_interfaces {
            let alts = description.alt_settings(number);
            if !alts.iter().any(|alt| alt.is_video_streaming()) {
                warn!(
                    "Device {}: interface {} is not a video streaming interface",
                    description.id, number
                );
                continue;
            }

            let interface = match StreamingInterface::parse(&alts, description.speed) {
                Ok(interface) => interface,
                Err(e) => {
                    warn!("Device {}: skipping streaming interface {}: {}", description.id, number, e);
                    continue;
                }
            };
            if !chains.iter().any(|c| c.contains(interface.terminal_link)) {
                warn!(
                    "Device {}: streaming interface {} links to terminal {} outside every chain",
                    description.id, number, interface.terminal_link
                );
            }

            streams.push(Arc::new(VideoStream::new(
                interface,
                Arc::clone(&control),
                Arc::clone(&transfers),
                Arc::clone(&pool),
                params,
                settings.clone(),
            )));
        }

        if streams.is_empty() {
            return Err(Error::NotSupported(format!(
                "{} has no usable streaming interface",
                description.id
            )));
        }

        info!(
            "Device {}: UVC {} with {} chains, {} controls, {} streams",
            description.id,
            info.version,
            chains.len(),
            registry.controls().len(),
            streams.len()
        );

        Ok(Self {
            description,
            control_interface,
            info,
            chains,
            quirks,
            registry: Mutex::new(registry),
            streams,
            lock_timeout: config.locking.timeout(),
        })
    }

    pub fn id(&self) -> UsbId {
        self.description.id
    }

    pub fn description(&self) -> &DeviceDescription {
        &self.description
    }

    pub fn version(&self) -> UvcVersion {
        self.info.version
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn control_interface(&self) -> u8 {
        self.control_interface
    }

    pub fn entities(&self) -> &EntityArena {
        &self.info.entities
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// Chain feeding a streaming interface
    pub fn chain_for(&self, stream: &VideoStream) -> Option<&Chain> {
        let link = stream.interface().terminal_link;
        self.chains.iter().find(|c| c.contains(link))
    }

    pub fn streams(&self) -> &[Arc<VideoStream>] {
        &self.streams
    }

    /// Stream bound to interface `number`
    pub fn stream(&self, number: u8) -> Option<&Arc<VideoStream>> {
        self.streams.iter().find(|s| s.interface().number == number)
    }

    pub fn controls(&self) -> Result<MutexGuard<'_, ControlRegistry>> {
        self.registry
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| Error::Timeout(format!("device {} control lock", self.description.id)))
    }

    /// Suspend every running stream
    ///
    /// Every stream is attempted; the first failure is returned.
    pub fn suspend(&self) -> Result<()> {
        let mut first_error = None;
        for stream in &self.streams {
            if stream.state()? != StreamState::Started {
                continue;
            }
            if let Err(e) = stream.suspend() {
                warn!("Device {}: suspend of stream {} failed: {}", self.id(), stream.interface().number, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Restore control values and restart suspended streams
    ///
    /// Cached values are dropped afterwards; the device may have changed
    /// them while suspended.
    pub fn resume(&self) -> Result<()> {
        {
            let mut controls = self.controls()?;
            controls.restore_values()?;
            controls.invalidate_all();
        }

        let mut first_error = None;
        for stream in &self.streams {
            if stream.state()? != StreamState::Suspended {
                continue;
            }
            if let Err(e) = stream.resume() {
                warn!("Device {}: resume of stream {} failed: {}", self.id(), stream.interface().number, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The device is gone: wake consumers and close every stream
    pub fn disconnect(&self) {
        info!("Device {}: disconnected", self.id());
        for stream in &self.streams {
            if let Err(e) = stream.disconnect() {
                warn!("Device {}: {}", self.id(), e);
            }
            match stream.state() {
                Ok(StreamState::Closed) => {}
                Ok(_) => {
                    if let Err(e) = stream.close() {
                        warn!("Device {}: close of stream {} failed: {}", self.id(), stream.interface().number, e);
                    }
                }
                Err(e) => warn!("Device {}: {}", self.id(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uvc_common::test_utils::{concat, simple_camera_control_interface, simple_streaming_interface};

    fn interface(number: u8, alternate: u8, class: u8, subclass: u8, endpoints: u8) -> Vec<u8> {
        vec![9, 4, number, alternate, endpoints, class, subclass, 0, 0]
    }

    fn endpoint(address: u8, attributes: u8, max_packet_size: u16) -> Vec<u8> {
        let mps = max_packet_size.to_le_bytes();
        vec![7, 5, address, attributes, mps[0], mps[1], 1]
    }

    #[test]
    fn test_from_configuration() {
        let config = concat(&[
            vec![9, 2, 0, 0, 2, 1, 0, 0x80, 250],
            interface(0, 0, 0x0e, 1, 0),
            simple_camera_control_interface(0x0110),
            interface(1, 0, 0x0e, 2, 0),
            simple_streaming_interface(0x81),
            interface(1, 1, 0x0e, 2, 1),
            endpoint(0x81, 0x05, 0x1400),
            vec![6, 0x30, 0, 0, 0x00, 0x0c],
        ]);

        let desc = DeviceDescription::from_configuration(UsbId::new(0x1234, 0x5678), UsbSpeed::Super, &config)
            .unwrap();
        assert_eq!(desc.interfaces.len(), 3);
        assert!(desc.video_control().is_some());
        assert!(!desc.video_control().unwrap().extra.is_empty());

        let alts = desc.alt_settings(1);
        assert_eq!(alts.len(), 2);
        assert!(alts[0].endpoints.is_empty());
        let ep = &alts[1].endpoints[0];
        assert!(ep.is_in());
        assert!(ep.is_isochronous());
        assert_eq!(ep.max_packet_size, 0x1400);
        assert_eq!(ep.bytes_per_interval, Some(0x0c00));
    }

    #[test]
    fn test_truncated_configuration() {
        let config = vec![9, 4, 0, 0];
        assert!(DeviceDescription::from_configuration(UsbId::new(1, 2), UsbSpeed::High, &config).is_err());
    }

    #[test]
    fn test_endpoint_kinds() {
        let bulk = EndpointDescription {
            address: 0x02,
            attributes: 0x02,
            max_packet_size: 512,
            interval: 0,
            bytes_per_interval: None,
        };
        assert!(bulk.is_bulk());
        assert!(!bulk.is_in());
        assert_eq!(bulk.config().max_packet_size, 512);
    }
}
