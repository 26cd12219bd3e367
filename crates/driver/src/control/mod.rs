//! Entity controls: static tables, logical mappings and the per-device registry

pub mod info;
pub mod mapping;
pub mod registry;

pub use info::{CONTROL_INFO, ControlFlags, ControlInfo, find_info, supported_controls};
pub use mapping::{ControlId, MAPPINGS, Mapping, MenuEntry, ValueKind, mappings_for};
pub use registry::{BoundInfo, Control, ControlDescription, ControlRegistry, MenuItem};
