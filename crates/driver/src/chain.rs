//! Video chain reconstruction
//!
//! A chain is grown from an output terminal towards the input terminal(s)
//! feeding it:
//!
//! ```text
//!   camera ──> [selector] ──> [processing] ──> [extension]* ──> output
//!   media  ──┘
//! ```
//!
//! For each entity on the way the scanner classifies it, attaches the
//! extension units and output terminals hanging off it (forward scan), then
//! steps to its source (backward scan). A multi-input selector branches into
//! every source, each of which must be an input terminal. Entities are only
//! claimed for good once the whole chain validates.

use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};
use uvc_common::{Error, Result};

use crate::entity::{Entity, EntityArena, EntityKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("entity {0} visited twice")]
    VisitedTwice(u8),

    #[error("extension unit {id} has {inputs} input pins, expected 1")]
    ExtensionInputs { id: u8, inputs: usize },

    #[error("more than one processing unit ({first} and {second})")]
    MultipleProcessing { first: u8, second: u8 },

    #[error("more than one multi-input selector unit ({first} and {second})")]
    MultipleSelectors { first: u8, second: u8 },

    #[error("input terminal {0} found while scanning forward")]
    InputTerminalForward(u8),

    #[error("entity {0} already belongs to a chain")]
    AlreadyClaimed(u8),

    #[error("reference to unknown entity {0}")]
    UnknownEntity(u8),

    #[error("output terminal {0} is not fed by any input terminal")]
    NoInputTerminal(u8),

    #[error("selector unit {selector} source {source_id} is not an input terminal")]
    SelectorSourceNotInput { selector: u8, source_id: u8 },
}

impl From<TopologyError> for Error {
    fn from(err: TopologyError) -> Self {
        Error::Malformed(format!("invalid video chain: {}", err))
    }
}

/// Validated path from input terminal(s) to an output terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    /// Member ids in source-to-sink order
    pub entities: Vec<u8>,
    /// Output terminal the scan started from
    pub output: u8,
    pub inputs: Vec<u8>,
    pub processing: Option<u8>,
    /// Multi-input selector unit, if any
    pub selector: Option<u8>,
}

impl Chain {
    pub fn contains(&self, id: u8) -> bool {
        self.entities.contains(&id)
    }
}

struct ChainBuilder<'a> {
    arena: &'a EntityArena,
    claimed: &'a HashSet<u8>,
    /// Members in the order they were reached
    members: Vec<u8>,
    inputs: Vec<u8>,
    processing: Option<u8>,
    selector: Option<u8>,
}

impl<'a> ChainBuilder<'a> {
    fn is_taken(&self, id: u8) -> bool {
        self.claimed.contains(&id) || self.members.contains(&id)
    }

    fn lookup(&self, id: u8) -> std::result::Result<&'a Entity, TopologyError> {
        if id == 0 {
            return Err(TopologyError::UnknownEntity(id));
        }
        self.arena.get(id).ok_or(TopologyError::UnknownEntity(id))
    }

    fn add(&mut self, entity: &Entity) {
        if entity.kind.is_input_terminal() {
            self.inputs.push(entity.id);
        }
        self.members.push(entity.id);
    }

    fn classify(&mut self, entity: &Entity) -> std::result::Result<(), TopologyError> {
        match &entity.kind {
            EntityKind::ExtensionUnit(_) => {
                if entity.num_inputs() != 1 {
                    return Err(TopologyError::ExtensionInputs {
                        id: entity.id,
                        inputs: entity.num_inputs(),
                    });
                }
            }
            EntityKind::ProcessingUnit(_) => {
                if let Some(first) = self.processing {
                    return Err(TopologyError::MultipleProcessing {
                        first,
                        second: entity.id,
                    });
                }
                self.processing = Some(entity.id);
            }
            EntityKind::SelectorUnit => {
                // Single-input selectors pass straight through
                if entity.num_inputs() > 1 {
                    if let Some(first) = self.selector {
                        return Err(TopologyError::MultipleSelectors {
                            first,
                            second: entity.id,
                        });
                    }
                    self.selector = Some(entity.id);
                }
            }
            _ => {}
        }
        self.add(entity);
        Ok(())
    }

    fn scan_forward(&mut self, entity: &Entity, prev: Option<u8>) -> std::result::Result<(), TopologyError> {
        let arena = self.arena;
        for forward in arena.referencing(entity.id) {
            if Some(forward.id) == prev {
                continue;
            }
            if self.is_taken(forward.id) {
                return Err(TopologyError::AlreadyClaimed(forward.id));
            }
            match &forward.kind {
                EntityKind::ExtensionUnit(_) => {
                    if forward.num_inputs() != 1 {
                        return Err(TopologyError::ExtensionInputs {
                            id: forward.id,
                            inputs: forward.num_inputs(),
                        });
                    }
                    debug!("Chain: attaching extension unit {}", forward.id);
                    self.add(forward);
                }
                EntityKind::OutputTerminal { .. } => {
                    debug!("Chain: attaching output terminal {}", forward.id);
                    self.add(forward);
                }
                kind if kind.is_input_terminal() => {
                    return Err(TopologyError::InputTerminalForward(forward.id));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Step to the entity feeding `entity`, or `None` when the walk is over
    fn scan_backward(&mut self, entity: &Entity) -> std::result::Result<Option<&'a Entity>, TopologyError> {
        let source = match &entity.kind {
            EntityKind::ProcessingUnit(_) | EntityKind::ExtensionUnit(_) => entity.sources.first().copied(),
            EntityKind::SelectorUnit if entity.num_inputs() == 1 => entity.sources.first().copied(),
            EntityKind::SelectorUnit => {
                for &id in &entity.sources {
                    let term = self.lookup(id)?;
                    if !term.kind.is_input_terminal() {
                        return Err(TopologyError::SelectorSourceNotInput {
                            selector: entity.id,
                            source_id: id,
                        });
                    }
                    if self.is_taken(id) {
                        return Err(TopologyError::AlreadyClaimed(id));
                    }
                    self.add(term);
                    self.scan_forward(term, Some(entity.id))?;
                }
                None
            }
            EntityKind::OutputTerminal { .. } => entity.sources.first().copied(),
            _ => None,
        };

        match source {
            Some(id) => self.lookup(id).map(Some),
            None => Ok(None),
        }
    }

    /// Members ordered so that every in-chain source precedes its sinks
    fn topological_order(&self) -> Vec<u8> {
        fn visit(id: u8, builder: &ChainBuilder<'_>, seen: &mut HashSet<u8>, out: &mut Vec<u8>) {
            if !seen.insert(id) {
                return;
            }
            if let Some(entity) = builder.arena.get(id) {
                for &source in &entity.sources {
                    if builder.members.contains(&source) {
                        visit(source, builder, seen, out);
                    }
                }
            }
            out.push(id);
        }

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.members.len());
        for &id in &self.members {
            visit(id, self, &mut seen, &mut out);
        }
        out
    }
}

/// Grow one chain from `output`, leaving `claimed` untouched
pub fn scan_chain(
    arena: &EntityArena,
    output: u8,
    claimed: &HashSet<u8>,
) -> std::result::Result<Chain, TopologyError> {
    let mut builder = ChainBuilder {
        arena,
        claimed,
        members: Vec::new(),
        inputs: Vec::new(),
        processing: None,
        selector: None,
    };

    let mut current = Some(builder.lookup(output)?);
    let mut prev: Option<u8> = None;

    while let Some(entity) = current {
        if builder.is_taken(entity.id) {
            return Err(TopologyError::VisitedTwice(entity.id));
        }
        builder.classify(entity)?;
        builder.scan_forward(entity, prev)?;
        prev = Some(entity.id);
        current = builder.scan_backward(entity)?;
    }

    if builder.inputs.is_empty() {
        return Err(TopologyError::NoInputTerminal(output));
    }

    Ok(Chain {
        entities: builder.topological_order(),
        output,
        inputs: builder.inputs.clone(),
        processing: builder.processing,
        selector: builder.selector,
    })
}

/// Build every chain of the function
///
/// Chains that violate a topology rule are logged and dropped. Fails with
/// [`Error::NotSupported`] when no chain survives.
pub fn scan_chains(arena: &EntityArena) -> Result<Vec<Chain>> {
    let mut claimed = HashSet::new();
    let mut chains = Vec::new();

    for term in arena.output_terminals() {
        if claimed.contains(&term.id) {
            continue;
        }
        match scan_chain(arena, term.id, &claimed) {
            Ok(chain) => {
                debug!(
                    "Found a valid video chain ({}) from output terminal {}",
                    describe(arena, &chain),
                    term.id
                );
                claimed.extend(chain.entities.iter().copied());
                chains.push(chain);
            }
            Err(e) => {
                warn!("Found an invalid video chain from output terminal {}: {}", term.id, e);
            }
        }
    }

    if chains.is_empty() {
        return Err(Error::NotSupported("no valid video chain".into()));
    }
    Ok(chains)
}

/// Human-readable `"1,2 -> 5 -> 3"` style summary
pub fn describe(arena: &EntityArena, chain: &Chain) -> String {
    chain
        .entities
        .iter()
        .map(|id| match arena.get(*id) {
            Some(entity) => format!("{} {}", entity.kind.label(), id),
            None => id.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CameraTerminal, ProcessingUnit};
    use uvc_protocol::constants::terminal_type;

    fn camera(id: u8) -> Entity {
        Entity::new(
            id,
            EntityKind::CameraTerminal(CameraTerminal {
                objective_focal_length_min: 0,
                objective_focal_length_max: 0,
                ocular_focal_length: 0,
                controls: vec![],
            }),
            vec![],
            0,
        )
    }

    fn processing(id: u8, source: u8) -> Entity {
        Entity::new(
            id,
            EntityKind::ProcessingUnit(ProcessingUnit {
                max_multiplier: 0,
                controls: vec![],
                video_standards: 0,
            }),
            vec![source],
            0,
        )
    }

    fn output(id: u8, source: u8) -> Entity {
        Entity::new(
            id,
            EntityKind::OutputTerminal {
                terminal_type: terminal_type::TT_STREAMING,
            },
            vec![source],
            0,
        )
    }

    #[test]
    fn test_linear_chain() {
        let mut arena = EntityArena::new();
        arena.insert(camera(1)).unwrap();
        arena.insert(processing(2, 1)).unwrap();
        arena.insert(output(3, 2)).unwrap();

        let chains = scan_chains(&arena).unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].entities, vec![1, 2, 3]);
        assert_eq!(chains[0].processing, Some(2));
        assert_eq!(chains[0].inputs, vec![1]);
    }

    #[test]
    fn test_dangling_source_rejected() {
        let mut arena = EntityArena::new();
        arena.insert(processing(2, 9)).unwrap();
        arena.insert(output(3, 2)).unwrap();

        assert_eq!(
            scan_chain(&arena, 3, &HashSet::new()),
            Err(TopologyError::UnknownEntity(9))
        );
        assert!(matches!(scan_chains(&arena), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_cycle_detected() {
        let mut arena = EntityArena::new();
        arena.insert(processing(2, 4)).unwrap();
        arena
            .insert(Entity::new(4, EntityKind::SelectorUnit, vec![2], 0))
            .unwrap();
        arena.insert(output(3, 2)).unwrap();

        assert!(scan_chain(&arena, 3, &HashSet::new()).is_err());
    }
}
