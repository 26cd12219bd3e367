//! Control registry
//!
//! One [`Control`] is created per set bit of an entity's control bitmap.
//! Standard controls are bound to the static info table right away and their
//! capabilities refined with GET_INFO; extension unit controls stay unbound
//! until first use because some devices misbehave when every extension
//! control is queried at attach time.
//!
//! Writes are staged: [`ControlRegistry::set`] updates the cached value and
//! marks the control dirty, [`ControlRegistry::commit`] sends SET_CUR for every
//! dirty control and [`ControlRegistry::rollback`] restores the snapshot taken
//! before the first staged write.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uvc_common::{Error, Result, UsbId};
use uvc_protocol::Request;
use uvc_protocol::constants::info_caps;

use super::info::{ControlFlags, find_info, supported_controls};
use super::mapping::{ControlId, Mapping, ValueKind, mappings_for};
use crate::entity::{EntityArena, EntityKind};
use crate::transport::{ClassRequest, ControlTransport, read_exact};

/// Selector, size and capabilities a control is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundInfo {
    pub selector: u8,
    /// Value size in bytes
    pub size: u16,
    pub flags: ControlFlags,
}

/// One control of an entity with its value cache
#[derive(Debug, Clone)]
pub struct Control {
    pub entity: u8,
    /// Bit index in the entity's control bitmap
    pub index: u8,
    extension: bool,
    info: Option<BoundInfo>,
    mappings: Vec<&'static Mapping>,
    current: Vec<u8>,
    backup: Vec<u8>,
    min: Vec<u8>,
    max: Vec<u8>,
    res: Vec<u8>,
    def: Vec<u8>,
    loaded: bool,
    cached: bool,
    dirty: bool,
    modified: bool,
}

impl Control {
    fn new(entity: u8, index: u8, extension: bool) -> Self {
        Self {
            entity,
            index,
            extension,
            info: None,
            mappings: Vec::new(),
            current: Vec::new(),
            backup: Vec::new(),
            min: Vec::new(),
            max: Vec::new(),
            res: Vec::new(),
            def: Vec::new(),
            loaded: false,
            cached: false,
            dirty: false,
            modified: false,
        }
    }

    fn bind(&mut self, info: BoundInfo) {
        let size = info.size as usize;
        self.info = Some(info);
        for slot in [
            &mut self.current,
            &mut self.backup,
            &mut self.min,
            &mut self.max,
            &mut self.res,
            &mut self.def,
        ] {
            *slot = vec![0; size];
        }
    }

    pub fn info(&self) -> Option<&BoundInfo> {
        self.info.as_ref()
    }

    pub fn is_extension(&self) -> bool {
        self.extension
    }

    pub fn is_bound(&self) -> bool {
        self.info.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Selector used on the wire; extension controls use `index + 1`
    pub fn selector(&self) -> u8 {
        match self.info {
            Some(info) => info.selector,
            None => self.index.wrapping_add(1),
        }
    }

    pub fn mapped_ids(&self) -> impl Iterator<Item = ControlId> + '_ {
        self.mappings.iter().map(|m| m.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub index: i64,
    pub name: &'static str,
}

/// Range and state of a logical control
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlDescription {
    pub id: ControlId,
    pub name: &'static str,
    pub kind: &'static str,
    pub entity: u8,
    pub selector: u8,
    pub minimum: i64,
    pub maximum: i64,
    pub step: i64,
    pub default: i64,
    /// Supported menu entries, for menu controls
    pub menu: Vec<MenuItem>,
    pub read_only: bool,
    pub write_only: bool,
    /// The controlling auto control is not in manual mode
    pub inactive: bool,
}

pub struct ControlRegistry {
    transport: Arc<dyn ControlTransport>,
    interface: u8,
    device: UsbId,
    controls: Vec<Control>,
}

impl ControlRegistry {
    /// Create the controls of every entity and bind the standard ones
    pub fn new(
        transport: Arc<dyn ControlTransport>,
        interface: u8,
        device: UsbId,
        entities: &EntityArena,
    ) -> Self {
        let mut registry = Self {
            transport,
            interface,
            device,
            controls: Vec::new(),
        };

        for entity in entities.iter() {
            let extension = matches!(entity.kind, EntityKind::ExtensionUnit(_));
            let indices = supported_controls(entity, device);
            debug!(
                "{} {} has {} controls",
                entity.kind.label(),
                entity.id,
                indices.len()
            );

            for index in indices {
                let mut ctrl = Control::new(entity.id, index, extension);
                if !extension {
                    if let Some(guid) = entity.kind.guid() {
                        if let Some(info) = find_info(&guid, index) {
                            let flags = registry.refine_flags(entity.id, info.selector, info.flags);
                            ctrl.bind(BoundInfo {
                                selector: info.selector,
                                size: info.size,
                                flags,
                            });
                            ctrl.mappings = mappings_for(&guid, info.selector);
                        }
                    }
                }
                registry.controls.push(ctrl);
            }
        }

        registry
    }

    pub fn device(&self) -> UsbId {
        self.device
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn controls_for(&self, entity: u8) -> impl Iterator<Item = &Control> {
        self.controls.iter().filter(move |c| c.entity == entity)
    }

    /// Logical controls exposed by the device
    pub fn available(&self) -> Vec<ControlId> {
        self.controls.iter().flat_map(|c| c.mapped_ids()).collect()
    }

    fn query(&self, request: Request, entity: u8, selector: u8, len: usize) -> Result<Vec<u8>> {
        let req = ClassRequest::new(request, selector, entity, self.interface);
        read_exact(self.transport.as_ref(), &req, len).map_err(|e| {
            debug!(
                "{} entity {} selector {:#04x} failed: {}",
                request.name(),
                entity,
                selector,
                e
            );
            Error::from(e)
        })
    }

    fn write(&self, entity: u8, selector: u8, data: &[u8]) -> Result<()> {
        let req = ClassRequest::new(Request::SetCur, selector, entity, self.interface);
        debug!(
            "SET_CUR entity {} selector {:#04x} {:02x?}",
            entity, selector, data
        );
        self.transport.write(&req, data).map_err(Error::from)
    }

    /// Apply the GET_INFO capability bits to the static flags
    fn refine_flags(&self, entity: u8, selector: u8, flags: ControlFlags) -> ControlFlags {
        let caps = match self.query(Request::GetInfo, entity, selector, 1) {
            Ok(data) => data[0],
            Err(e) => {
                debug!(
                    "GET_INFO failed for entity {} selector {:#04x}, keeping static flags: {}",
                    entity, selector, e
                );
                return flags;
            }
        };

        let mut flags = flags;
        if caps & info_caps::GET == 0 {
            flags.remove(ControlFlags::GET_CUR);
        }
        if caps & info_caps::SET == 0 {
            flags.remove(ControlFlags::SET_CUR);
        }
        if caps & info_caps::AUTO_UPDATE != 0 {
            flags.insert(ControlFlags::AUTO_UPDATE);
        }
        flags
    }

    /// Bind an extension control from GET_LEN and GET_INFO
    fn ensure_bound(&mut self, idx: usize) -> Result<BoundInfo> {
        let ctrl = &self.controls[idx];
        if let Some(info) = ctrl.info {
            return Ok(info);
        }
        if !ctrl.extension {
            return Err(Error::NotSupported(format!(
                "control {} of entity {} is not described",
                ctrl.index, ctrl.entity
            )));
        }

        let (entity, selector) = (ctrl.entity, ctrl.selector());
        let len = self.query(Request::GetLen, entity, selector, 2)?;
        let size = u16::from_le_bytes([len[0], len[1]]);
        if size == 0 {
            return Err(Error::Malformed(format!(
                "extension unit {} selector {:#04x} reports zero length",
                entity, selector
            )));
        }
        let caps = self.query(Request::GetInfo, entity, selector, 1)?[0];

        let mut flags =
            ControlFlags::GET_MIN | ControlFlags::GET_MAX | ControlFlags::GET_RES | ControlFlags::GET_DEF;
        if caps & info_caps::GET != 0 {
            flags |= ControlFlags::GET_CUR;
        }
        if caps & info_caps::SET != 0 {
            flags |= ControlFlags::SET_CUR;
        }
        if caps & info_caps::AUTO_UPDATE != 0 {
            flags |= ControlFlags::AUTO_UPDATE;
        }

        let info = BoundInfo {
            selector,
            size,
            flags,
        };
        debug!(
            "Bound extension unit {} selector {:#04x}: {} bytes, {:?}",
            entity, selector, size, flags
        );
        self.controls[idx].bind(info);
        Ok(info)
    }

    fn find(&self, id: ControlId) -> Result<(usize, &'static Mapping, BoundInfo)> {
        for (idx, ctrl) in self.controls.iter().enumerate() {
            if let (Some(info), Some(mapping)) =
                (ctrl.info, ctrl.mappings.iter().find(|m| m.id == id))
            {
                return Ok((idx, *mapping, info));
            }
        }
        Err(Error::NotSupported(format!("control '{}' not available", id)))
    }

    fn load_current(&mut self, idx: usize) -> Result<()> {
        let ctrl = &self.controls[idx];
        if ctrl.loaded {
            return Ok(());
        }
        let info = ctrl.info.ok_or_else(|| Error::NotSupported("unbound control".into()))?;
        let data = self.query(Request::GetCur, ctrl.entity, info.selector, info.size as usize)?;
        let ctrl = &mut self.controls[idx];
        ctrl.current = data;
        ctrl.loaded = true;
        Ok(())
    }

    /// Fetch the default and range values once
    fn populate(&mut self, idx: usize) -> Result<()> {
        let ctrl = &self.controls[idx];
        if ctrl.cached {
            return Ok(());
        }
        let info = ctrl.info.ok_or_else(|| Error::NotSupported("unbound control".into()))?;
        let (entity, extension) = (ctrl.entity, ctrl.extension);
        let size = info.size as usize;

        let fetch = |flag: ControlFlags, request: Request| -> Result<Option<Vec<u8>>> {
            if info.flags.contains(flag) {
                self.query(request, entity, info.selector, size).map(Some)
            } else {
                Ok(None)
            }
        };

        let def = fetch(ControlFlags::GET_DEF, Request::GetDef)?;
        let min = fetch(ControlFlags::GET_MIN, Request::GetMin)?;
        let max = fetch(ControlFlags::GET_MAX, Request::GetMax)?;
        let res = match fetch(ControlFlags::GET_RES, Request::GetRes) {
            Ok(res) => res,
            Err(e) if extension => {
                warn!(
                    "GET_RES failed on extension unit {} selector {:#04x}, assuming 0: {}",
                    entity, info.selector, e
                );
                None
            }
            Err(e) => return Err(e),
        };

        let ctrl = &mut self.controls[idx];
        for (slot, value) in [
            (&mut ctrl.def, def),
            (&mut ctrl.min, min),
            (&mut ctrl.max, max),
            (&mut ctrl.res, res),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
        ctrl.cached = true;
        Ok(())
    }

    /// Current value of a logical control; menu controls return the entry index
    pub fn get(&mut self, id: ControlId) -> Result<i64> {
        let (idx, mapping, info) = self.find(id)?;
        if !info.flags.contains(ControlFlags::GET_CUR) {
            return Err(Error::NotSupported(format!("'{}' cannot be read", id)));
        }
        self.load_current(idx)?;
        let raw = mapping.get(Request::GetCur, &self.controls[idx].current);
        Ok(menu_index(mapping, raw))
    }

    /// Stage a new value; nothing is sent until [`commit`](Self::commit)
    pub fn set(&mut self, id: ControlId, value: i64) -> Result<()> {
        let (idx, mapping, info) = self.find(id)?;
        if !info.flags.contains(ControlFlags::SET_CUR) {
            return Err(Error::Permission(format!("'{}' is read-only", id)));
        }

        let raw = match mapping.kind {
            ValueKind::Signed | ValueKind::Unsigned => {
                self.populate(idx)?;
                self.clamp_integer(idx, mapping, info.flags, value)
            }
            ValueKind::Boolean => value.clamp(0, 1),
            ValueKind::Enum(menu) | ValueKind::Bitmask(menu) => {
                let entry = usize::try_from(value)
                    .ok()
                    .and_then(|i| menu.get(i))
                    .ok_or_else(|| {
                        Error::OutOfRange(format!(
                            "'{}' menu index {} outside 0..{}",
                            id,
                            value,
                            menu.len()
                        ))
                    })?;
                if info.flags.contains(ControlFlags::GET_RES) {
                    self.populate(idx)?;
                    let supported = mapping.get(Request::GetRes, &self.controls[idx].res);
                    if supported & entry.value as i64 == 0 {
                        return Err(Error::OutOfRange(format!(
                            "'{}' mode '{}' not supported by the device",
                            id, entry.name
                        )));
                    }
                }
                entry.value as i64
            }
        };

        if !self.controls[idx].loaded {
            if info.flags.contains(ControlFlags::GET_CUR) {
                self.load_current(idx)?;
            } else {
                let ctrl = &mut self.controls[idx];
                ctrl.current.fill(0);
                ctrl.loaded = true;
            }
        }

        let ctrl = &mut self.controls[idx];
        if !ctrl.dirty {
            ctrl.backup = ctrl.current.clone();
        }
        mapping.set(raw, &mut ctrl.current);
        ctrl.dirty = true;
        debug!("Staged '{}' = {} (raw {})", id, value, raw);
        Ok(())
    }

    fn clamp_integer(&self, idx: usize, mapping: &Mapping, flags: ControlFlags, value: i64) -> i64 {
        if !flags.contains(ControlFlags::GET_MIN | ControlFlags::GET_MAX) {
            return value;
        }
        let ctrl = &self.controls[idx];
        let min = mapping.get(Request::GetMin, &ctrl.min);
        let max = mapping.get(Request::GetMax, &ctrl.max);
        if min > max {
            warn!(
                "'{}' reports min {} above max {}, not clamping",
                mapping.id, min, max
            );
            return value;
        }
        let step = if flags.contains(ControlFlags::GET_RES) {
            mapping.get(Request::GetRes, &ctrl.res).max(1)
        } else {
            1
        };

        let value = value.clamp(min, max);
        let rounded = min.saturating_add((value - min).saturating_add(step / 2) / step * step);
        rounded.clamp(min, max)
    }

    /// Send SET_CUR for every dirty control
    ///
    /// On the first failure every staged value is rolled back and the error
    /// returned.
    pub fn commit(&mut self) -> Result<()> {
        let dirty: Vec<usize> = (0..self.controls.len())
            .filter(|&i| self.controls[i].dirty)
            .collect();

        for idx in dirty {
            let ctrl = &self.controls[idx];
            let Some(info) = ctrl.info else {
                continue;
            };
            if let Err(e) = self.write(ctrl.entity, info.selector, &ctrl.current) {
                warn!(
                    "Failed to commit entity {} selector {:#04x}: {}",
                    ctrl.entity, info.selector, e
                );
                self.rollback();
                return Err(e);
            }

            let ctrl = &mut self.controls[idx];
            ctrl.dirty = false;
            ctrl.modified = true;
            if !info.flags.contains(ControlFlags::GET_CUR)
                || info.flags.contains(ControlFlags::AUTO_UPDATE)
            {
                ctrl.loaded = false;
            }
        }
        Ok(())
    }

    /// Discard staged values
    pub fn rollback(&mut self) {
        for ctrl in self.controls.iter_mut().filter(|c| c.dirty) {
            ctrl.current = ctrl.backup.clone();
            ctrl.dirty = false;
        }
    }

    /// Describe a logical control, fetching its range on first use
    pub fn describe(&mut self, id: ControlId) -> Result<ControlDescription> {
        let (idx, mapping, info) = self.find(id)?;
        self.populate(idx)?;

        let ctrl = &self.controls[idx];
        let default = if info.flags.contains(ControlFlags::GET_DEF) {
            menu_index(mapping, mapping.get(Request::GetDef, &ctrl.def))
        } else {
            0
        };

        let (minimum, maximum, step, menu) = match mapping.kind {
            ValueKind::Signed | ValueKind::Unsigned => (
                if info.flags.contains(ControlFlags::GET_MIN) {
                    mapping.get(Request::GetMin, &ctrl.min)
                } else {
                    0
                },
                if info.flags.contains(ControlFlags::GET_MAX) {
                    mapping.get(Request::GetMax, &ctrl.max)
                } else {
                    0
                },
                if info.flags.contains(ControlFlags::GET_RES) {
                    mapping.get(Request::GetRes, &ctrl.res)
                } else {
                    0
                },
                Vec::new(),
            ),
            ValueKind::Boolean => (0, 1, 1, Vec::new()),
            ValueKind::Enum(entries) | ValueKind::Bitmask(entries) => {
                let supported = if info.flags.contains(ControlFlags::GET_RES) {
                    Some(mapping.get(Request::GetRes, &ctrl.res))
                } else {
                    None
                };
                let menu = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| supported.is_none_or(|bits| bits & e.value as i64 != 0))
                    .map(|(i, e)| MenuItem {
                        index: i as i64,
                        name: e.name,
                    })
                    .collect();
                (0, entries.len() as i64 - 1, 1, menu)
            }
        };

        let entity = ctrl.entity;
        let inactive = match mapping.master {
            Some((master, manual)) => match self.get(master) {
                Ok(value) => value != manual,
                Err(_) => false,
            },
            None => false,
        };

        Ok(ControlDescription {
            id,
            name: id.name(),
            kind: mapping.kind.name(),
            entity,
            selector: info.selector,
            minimum,
            maximum,
            step,
            default,
            menu,
            read_only: !info.flags.contains(ControlFlags::SET_CUR),
            write_only: !info.flags.contains(ControlFlags::GET_CUR),
            inactive,
        })
    }

    /// Descriptions of every logical control that can be described
    pub fn describe_all(&mut self) -> Vec<ControlDescription> {
        let ids = self.available();
        ids.into_iter()
            .filter_map(|id| match self.describe(id) {
                Ok(desc) => Some(desc),
                Err(e) => {
                    debug!("Cannot describe '{}': {}", id, e);
                    None
                }
            })
            .collect()
    }

    /// Forget the cached current value of a control
    pub fn invalidate(&mut self, id: ControlId) -> Result<()> {
        let (idx, _, _) = self.find(id)?;
        let ctrl = &mut self.controls[idx];
        if !ctrl.dirty {
            ctrl.loaded = false;
        }
        Ok(())
    }

    /// Forget every cached current value that has no pending write
    pub fn invalidate_all(&mut self) {
        for ctrl in self.controls.iter_mut().filter(|c| !c.dirty) {
            ctrl.loaded = false;
        }
    }

    /// Write back every committed value flagged for restore
    ///
    /// Used after resume, when the device may have lost its settings.
    pub fn restore_values(&mut self) -> Result<()> {
        for ctrl in &mut self.controls {
            let restorable = ctrl
                .info
                .is_some_and(|info| info.flags.contains(ControlFlags::RESTORE));
            if restorable && ctrl.modified && !ctrl.dirty {
                ctrl.backup = ctrl.current.clone();
                ctrl.dirty = true;
            }
        }
        self.commit()
    }

    /// Reset every restorable control to its default value
    ///
    /// Failures are logged; the remaining controls are still reset.
    pub fn restore_defaults(&mut self) {
        for idx in 0..self.controls.len() {
            let Some(info) = self.controls[idx].info else {
                continue;
            };
            if !info
                .flags
                .contains(ControlFlags::RESTORE | ControlFlags::GET_DEF | ControlFlags::SET_CUR)
            {
                continue;
            }
            if let Err(e) = self.populate(idx) {
                warn!("Cannot read default of entity {} selector {:#04x}: {}", self.controls[idx].entity, info.selector, e);
                continue;
            }
            let ctrl = &self.controls[idx];
            if let Err(e) = self.write(ctrl.entity, info.selector, &ctrl.def) {
                warn!("Cannot restore entity {} selector {:#04x}: {}", ctrl.entity, info.selector, e);
                continue;
            }
            let ctrl = &mut self.controls[idx];
            ctrl.current = ctrl.def.clone();
            ctrl.loaded = info.flags.contains(ControlFlags::GET_CUR)
                && !info.flags.contains(ControlFlags::AUTO_UPDATE);
        }
    }

    fn find_raw(&self, entity: u8, selector: u8) -> Result<usize> {
        self.controls
            .iter()
            .position(|c| c.entity == entity && c.selector() == selector)
            .ok_or_else(|| {
                Error::NotSupported(format!(
                    "entity {} has no control with selector {:#04x}",
                    entity, selector
                ))
            })
    }

    /// Raw GET_* request, mainly for extension unit controls
    pub fn query_raw(&mut self, entity: u8, selector: u8, request: Request) -> Result<Vec<u8>> {
        let idx = self.find_raw(entity, selector)?;
        let info = self.ensure_bound(idx)?;

        let (required, len) = match request {
            Request::GetCur => (ControlFlags::GET_CUR, info.size as usize),
            Request::GetMin => (ControlFlags::GET_MIN, info.size as usize),
            Request::GetMax => (ControlFlags::GET_MAX, info.size as usize),
            Request::GetRes => (ControlFlags::GET_RES, info.size as usize),
            Request::GetDef => (ControlFlags::GET_DEF, info.size as usize),
            Request::GetLen => (ControlFlags::empty(), 2),
            Request::GetInfo => (ControlFlags::empty(), 1),
            Request::SetCur => {
                return Err(Error::NotSupported("SET_CUR is not a query".into()));
            }
        };
        if !info.flags.contains(required) {
            return Err(Error::NotSupported(format!(
                "{} not supported by entity {} selector {:#04x}",
                request.name(),
                entity,
                selector
            )));
        }
        self.query(request, entity, selector, len)
    }

    /// Raw SET_CUR, sent immediately
    pub fn set_raw(&mut self, entity: u8, selector: u8, data: &[u8]) -> Result<()> {
        let idx = self.find_raw(entity, selector)?;
        let info = self.ensure_bound(idx)?;
        if !info.flags.contains(ControlFlags::SET_CUR) {
            return Err(Error::Permission(format!(
                "entity {} selector {:#04x} is read-only",
                entity, selector
            )));
        }
        if data.len() != info.size as usize {
            return Err(Error::OutOfRange(format!(
                "expected {} bytes, got {}",
                info.size,
                data.len()
            )));
        }
        self.write(entity, selector, data)?;
        let ctrl = &mut self.controls[idx];
        ctrl.loaded = false;
        ctrl.modified = true;
        Ok(())
    }
}

fn menu_index(mapping: &Mapping, raw: i64) -> i64 {
    match mapping.kind.menu() {
        Some(menu) => menu
            .iter()
            .position(|e| e.value as i64 == raw)
            .map(|i| i as i64)
            .unwrap_or(raw),
        None => raw,
    }
}
