//! Entity graph builder
//!
//! Turns the class-specific descriptors attached to the video control
//! interface into typed [`Entity`] records. Entities live in an
//! [`EntityArena`] and refer to each other by id only; edges are resolved
//! through the arena's id lookup.
//!
//! Parsing is lenient per descriptor: a descriptor that is too short for the
//! fields it declares is logged and skipped, and the walk continues with the
//! next one. Only a missing or unreadable interface header aborts the parse.

use bitflags::bitflags;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uvc_common::{Error, Result};
use uvc_protocol::constants::{VcSubtype, descriptor_type, terminal_type};
use uvc_protocol::{DescriptorIter, DescriptorReader, Guid, ProtocolError, RawDescriptor, UvcVersion};

use crate::transport::StringFetcher;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct PadFlags: u8 {
        const SINK = 1 << 0;
        const SOURCE = 1 << 1;
        const MUST_CONNECT = 1 << 2;
    }
}

/// Connection point of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pad {
    pub flags: PadFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraTerminal {
    pub objective_focal_length_min: u16,
    pub objective_focal_length_max: u16,
    pub ocular_focal_length: u16,
    pub controls: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaTerminal {
    pub controls: Vec<u8>,
    pub transport_modes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingUnit {
    pub max_multiplier: u16,
    pub controls: Vec<u8>,
    /// bmVideoStandards, UVC 1.1 and later
    pub video_standards: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionUnit {
    pub guid: Guid,
    pub num_controls: u8,
    pub controls: Vec<u8>,
}

/// Type-specific payload of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EntityKind {
    CameraTerminal(CameraTerminal),
    MediaTerminal(MediaTerminal),
    /// Vendor-specific or streaming input terminal
    InputTerminal { terminal_type: u16 },
    /// Vendor-specific, display, media or streaming output terminal
    OutputTerminal { terminal_type: u16 },
    SelectorUnit,
    ProcessingUnit(ProcessingUnit),
    ExtensionUnit(ExtensionUnit),
}

impl EntityKind {
    pub fn is_input_terminal(&self) -> bool {
        matches!(
            self,
            EntityKind::CameraTerminal(_) | EntityKind::MediaTerminal(_) | EntityKind::InputTerminal { .. }
        )
    }

    pub fn is_output_terminal(&self) -> bool {
        matches!(self, EntityKind::OutputTerminal { .. })
    }

    /// GUID used to look up static control tables
    pub fn guid(&self) -> Option<Guid> {
        match self {
            EntityKind::CameraTerminal(_) => Some(Guid::CAMERA),
            EntityKind::MediaTerminal(_) => Some(Guid::MEDIA),
            EntityKind::OutputTerminal { .. } => Some(Guid::OUTPUT),
            EntityKind::SelectorUnit => Some(Guid::SELECTOR),
            EntityKind::ProcessingUnit(_) => Some(Guid::PROCESSING),
            EntityKind::ExtensionUnit(xu) => Some(xu.guid),
            EntityKind::InputTerminal { .. } => None,
        }
    }

    /// Control bitmap, empty for entities without controls
    pub fn controls(&self) -> &[u8] {
        match self {
            EntityKind::CameraTerminal(ct) => &ct.controls,
            EntityKind::MediaTerminal(mt) => &mt.controls,
            EntityKind::ProcessingUnit(pu) => &pu.controls,
            EntityKind::ExtensionUnit(xu) => &xu.controls,
            _ => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::CameraTerminal(_) => "camera terminal",
            EntityKind::MediaTerminal(_) => "media transport terminal",
            EntityKind::InputTerminal { terminal_type: kind }
                if *kind == terminal_type::TT_STREAMING =>
            {
                "streaming input terminal"
            }
            EntityKind::InputTerminal { .. } => "input terminal",
            EntityKind::OutputTerminal { terminal_type: kind }
                if *kind == terminal_type::TT_STREAMING =>
            {
                "streaming output terminal"
            }
            EntityKind::OutputTerminal { .. } => "output terminal",
            EntityKind::SelectorUnit => "selector unit",
            EntityKind::ProcessingUnit(_) => "processing unit",
            EntityKind::ExtensionUnit(_) => "extension unit",
        }
    }

    fn default_name_prefix(&self) -> &'static str {
        match self {
            EntityKind::CameraTerminal(_) => "Camera",
            EntityKind::MediaTerminal(_) => "Media",
            EntityKind::InputTerminal { .. } => "Input",
            EntityKind::OutputTerminal { .. } => "Output",
            EntityKind::SelectorUnit => "Selector",
            EntityKind::ProcessingUnit(_) => "Processing",
            EntityKind::ExtensionUnit(_) => "Extension",
        }
    }
}

/// Node of the video function graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub id: u8,
    pub kind: EntityKind,
    /// Upstream entity ids, one per input pin
    pub sources: Vec<u8>,
    pub pads: Vec<Pad>,
    pub name: String,
    #[serde(skip)]
    pub string_index: u8,
}

impl Entity {
    /// Build an entity with pads derived from its kind and sources
    pub fn new(id: u8, kind: EntityKind, sources: Vec<u8>, string_index: u8) -> Self {
        let mut pads: Vec<Pad> = sources
            .iter()
            .map(|_| Pad {
                flags: PadFlags::SINK | PadFlags::MUST_CONNECT,
            })
            .collect();
        if !kind.is_output_terminal() {
            pads.push(Pad {
                flags: PadFlags::SOURCE,
            });
        }
        let name = format!("{} {}", kind.default_name_prefix(), id);
        Self {
            id,
            kind,
            sources,
            pads,
            name,
            string_index,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.sources.len()
    }

    pub fn references(&self, id: u8) -> bool {
        self.sources.contains(&id)
    }
}

/// Owned entities plus an id lookup
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityArena {
    entities: Vec<Entity>,
    #[serde(skip)]
    index: HashMap<u8, usize>,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity; a duplicate id is rejected
    pub fn insert(&mut self, entity: Entity) -> Result<()> {
        if self.index.contains_key(&entity.id) {
            return Err(Error::Malformed(format!(
                "duplicate entity id {} ({})",
                entity.id,
                entity.kind.label()
            )));
        }
        self.index.insert(entity.id, self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    pub fn get(&self, id: u8) -> Option<&Entity> {
        self.index.get(&id).map(|&i| &self.entities[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Output terminals in descriptor order
    pub fn output_terminals(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.kind.is_output_terminal())
    }

    /// Entities listing `id` among their sources, in descriptor order
    pub fn referencing(&self, id: u8) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.references(id))
    }
}

/// Parsed video control interface
#[derive(Debug, Clone, Serialize)]
pub struct ControlInterface {
    pub version: UvcVersion,
    pub clock_frequency: u32,
    /// baInterfaceNr of the interface collection
    pub streaming_interfaces: Vec<u8>,
    pub entities: EntityArena,
}

struct Header {
    version: UvcVersion,
    clock_frequency: u32,
    streaming_interfaces: Vec<u8>,
}

fn parse_header(desc: &RawDescriptor<'_>) -> Result<Header> {
    let r = desc.reader("video control header");
    r.require(12)?;
    let count = r.u8_at(11)? as usize;
    let interfaces = r.slice_at(12, count)?;
    Ok(Header {
        version: UvcVersion(r.u16_at(3)?),
        clock_frequency: r.u32_at(7)?,
        streaming_interfaces: interfaces.to_vec(),
    })
}

fn valid_terminal_type(kind: u16) -> bool {
    kind & 0x7f00 != 0 && kind & 0x8000 == 0
}

fn parse_input_terminal(r: &DescriptorReader<'_>) -> std::result::Result<Option<Entity>, ProtocolError> {
    r.require(8)?;
    let id = r.u8_at(3)?;
    let kind = r.u16_at(4)?;
    if !valid_terminal_type(kind) {
        warn!(
            "Skipping input terminal {} with invalid type {:#06x}",
            id, kind
        );
        return Ok(None);
    }

    let (payload, string_index) = match kind {
        terminal_type::ITT_CAMERA => {
            let size = r.u8_or(14, 0) as usize;
            r.require(15 + size)?;
            let payload = EntityKind::CameraTerminal(CameraTerminal {
                objective_focal_length_min: r.u16_at(8)?,
                objective_focal_length_max: r.u16_at(10)?,
                ocular_focal_length: r.u16_at(12)?,
                controls: r.slice_at(15, size)?.to_vec(),
            });
            (payload, r.u8_at(7)?)
        }
        terminal_type::ITT_MEDIA_TRANSPORT_INPUT => {
            let size = r.u8_or(8, 0) as usize;
            let modes = r.u8_or(9 + size, 0) as usize;
            r.require(10 + size + modes)?;
            let payload = EntityKind::MediaTerminal(MediaTerminal {
                controls: r.slice_at(9, size)?.to_vec(),
                transport_modes: r.slice_at(10 + size, modes)?.to_vec(),
            });
            (payload, r.u8_at(7)?)
        }
        _ => (EntityKind::InputTerminal { terminal_type: kind }, r.u8_at(7)?),
    };

    Ok(Some(Entity::new(id, payload, Vec::new(), string_index)))
}

fn parse_output_terminal(r: &DescriptorReader<'_>) -> std::result::Result<Option<Entity>, ProtocolError> {
    r.require(9)?;
    let id = r.u8_at(3)?;
    let kind = r.u16_at(4)?;
    if !valid_terminal_type(kind) {
        warn!(
            "Skipping output terminal {} with invalid type {:#06x}",
            id, kind
        );
        return Ok(None);
    }
    Ok(Some(Entity::new(
        id,
        EntityKind::OutputTerminal { terminal_type: kind },
        vec![r.u8_at(7)?],
        r.u8_at(8)?,
    )))
}

fn parse_selector_unit(r: &DescriptorReader<'_>) -> std::result::Result<Entity, ProtocolError> {
    let pins = r.u8_or(4, 0) as usize;
    r.require(6 + pins)?;
    Ok(Entity::new(
        r.u8_at(3)?,
        EntityKind::SelectorUnit,
        r.slice_at(5, pins)?.to_vec(),
        r.u8_at(5 + pins)?,
    ))
}

fn parse_processing_unit(
    r: &DescriptorReader<'_>,
    version: UvcVersion,
) -> std::result::Result<Entity, ProtocolError> {
    let size = r.u8_or(7, 0) as usize;
    let with_standards = version >= UvcVersion::V1_1;
    r.require(if with_standards { 10 } else { 9 } + size)?;
    let payload = EntityKind::ProcessingUnit(ProcessingUnit {
        max_multiplier: r.u16_at(5)?,
        controls: r.slice_at(8, size)?.to_vec(),
        video_standards: if with_standards { r.u8_at(9 + size)? } else { 0 },
    });
    Ok(Entity::new(
        r.u8_at(3)?,
        payload,
        vec![r.u8_at(4)?],
        r.u8_at(8 + size)?,
    ))
}

fn parse_extension_unit(r: &DescriptorReader<'_>) -> std::result::Result<Entity, ProtocolError> {
    let pins = r.u8_or(21, 0) as usize;
    let size = r.u8_or(22 + pins, 0) as usize;
    r.require(24 + pins + size)?;
    let payload = EntityKind::ExtensionUnit(ExtensionUnit {
        guid: r.guid_at(4)?,
        num_controls: r.u8_at(20)?,
        controls: r.slice_at(23 + pins, size)?.to_vec(),
    });
    Ok(Entity::new(
        r.u8_at(3)?,
        payload,
        r.slice_at(22, pins)?.to_vec(),
        r.u8_at(23 + pins + size)?,
    ))
}

fn parse_entity(
    desc: &RawDescriptor<'_>,
    version: UvcVersion,
) -> std::result::Result<Option<Entity>, ProtocolError> {
    match VcSubtype::from_u8(desc.subtype) {
        Some(VcSubtype::InputTerminal) => parse_input_terminal(&desc.reader("input terminal")),
        Some(VcSubtype::OutputTerminal) => parse_output_terminal(&desc.reader("output terminal")),
        Some(VcSubtype::SelectorUnit) => parse_selector_unit(&desc.reader("selector unit")).map(Some),
        Some(VcSubtype::ProcessingUnit) => {
            parse_processing_unit(&desc.reader("processing unit"), version).map(Some)
        }
        Some(VcSubtype::ExtensionUnit) => parse_extension_unit(&desc.reader("extension unit")).map(Some),
        Some(VcSubtype::Header) => Ok(None),
        Some(VcSubtype::EncodingUnit) | None => {
            debug!(
                "Ignoring video control descriptor subtype {:#04x} at offset {}",
                desc.subtype, desc.offset
            );
            Ok(None)
        }
    }
}

/// Parse the extra bytes of the video control interface
pub fn parse_control_interface(extra: &[u8], strings: &dyn StringFetcher) -> Result<ControlInterface> {
    let mut descriptors = Vec::new();
    for item in DescriptorIter::new(extra) {
        match item {
            Ok(desc) => descriptors.push(desc),
            Err(e) => {
                warn!("Stopping video control descriptor walk: {}", e);
                break;
            }
        }
    }

    let header_desc = descriptors
        .iter()
        .find(|d| {
            d.descriptor_type == descriptor_type::CS_INTERFACE && d.subtype == VcSubtype::Header as u8
        })
        .ok_or_else(|| Error::Malformed("video control interface has no header".into()))?;
    let header = parse_header(header_desc)
        .map_err(|e| Error::Malformed(format!("video control header: {}", e)))?;

    debug!(
        "UVC {} control interface, clock {} Hz, streaming interfaces {:?}",
        header.version, header.clock_frequency, header.streaming_interfaces
    );

    let mut entities = EntityArena::new();
    for desc in descriptors
        .iter()
        .filter(|d| d.descriptor_type == descriptor_type::CS_INTERFACE)
    {
        let mut entity = match parse_entity(desc, header.version) {
            Ok(Some(entity)) => entity,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    "Skipping malformed descriptor at offset {}: {}",
                    desc.offset,
                    Error::Malformed(e.to_string())
                );
                continue;
            }
        };

        if entity.string_index != 0 {
            match strings.string(entity.string_index) {
                Some(name) => entity.name = name,
                None => debug!(
                    "String {} for entity {} unavailable, using '{}'",
                    entity.string_index, entity.id, entity.name
                ),
            }
        }

        debug!(
            "Found {} {} '{}' sources {:?}",
            entity.kind.label(),
            entity.id,
            entity.name,
            entity.sources
        );

        if let Err(e) = entities.insert(entity) {
            warn!("Skipping entity at offset {}: {}", desc.offset, e);
        }
    }

    Ok(ControlInterface {
        version: header.version,
        clock_frequency: header.clock_frequency,
        streaming_interfaces: header.streaming_interfaces,
        entities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NoStrings;
    use uvc_common::test_utils::*;

    #[test]
    fn test_simple_interface() {
        let extra = simple_camera_control_interface(0x0110);
        let vc = parse_control_interface(&extra, &NoStrings).unwrap();
        assert_eq!(vc.version, UvcVersion::V1_1);
        assert_eq!(vc.clock_frequency, 48_000_000);
        assert_eq!(vc.streaming_interfaces, vec![1]);
        assert_eq!(vc.entities.len(), 3);

        let camera = vc.entities.get(1).unwrap();
        assert!(camera.kind.is_input_terminal());
        assert_eq!(camera.kind.controls(), &[0x0a, 0, 0]);
        assert_eq!(camera.name, "Camera 1");
        assert_eq!(camera.pads.len(), 1);

        let pu = vc.entities.get(2).unwrap();
        assert_eq!(pu.sources, vec![1]);
        assert_eq!(pu.pads.len(), 2);
        assert!(pu.pads[0].flags.contains(PadFlags::SINK));
        assert!(pu.pads[1].flags.contains(PadFlags::SOURCE));

        let ot = vc.entities.get(3).unwrap();
        assert!(ot.kind.is_output_terminal());
        assert_eq!(ot.pads.len(), 1);
    }

    #[test]
    fn test_processing_unit_length_depends_on_version() {
        // A 1.0-layout unit is one byte short for a 1.1 device
        let extra = concat(&[
            vc_header(0x0110, 0, &[1]),
            processing_unit_v10(2, 1, &[0x01, 0x00]),
        ]);
        let vc = parse_control_interface(&extra, &NoStrings).unwrap();
        assert!(vc.entities.get(2).is_none());

        let extra = concat(&[
            vc_header(0x0100, 0, &[1]),
            processing_unit_v10(2, 1, &[0x01, 0x00]),
        ]);
        let vc = parse_control_interface(&extra, &NoStrings).unwrap();
        assert!(vc.entities.get(2).is_some());
    }
}
