//! Code unit registry: stable ids and definitions for profiled units
//!
//! A code unit is a function, method, or top-level module body. The first
//! call into a unit assigns it the next sequential id (starting at 1) and
//! records an immutable definition; every later call maps to the same id.
//! The definition list feeds the trace writer's `D` chunk verbatim.
//!
//! Units are keyed by their (file, first line, name) triple rather than by
//! any runtime object identity, so ids are stable across any host runtime
//! without relying on object interning.

use crate::intern::FileId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Synthetic name recorded for top-level module bodies
pub const MODULE_NAME: &str = "(module)";

/// Host-runtime spelling of a top-level module body's name
const MODULE_DESCRIPTOR_NAME: &str = "<module>";

/// Stable small integer identifying a code unit, assigned from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeUnitId(pub u32);

/// What the event source knows about a unit at call time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor<'a> {
    pub file: FileId,
    pub start_line: u32,
    pub end_line: u32,
    pub name: &'a str,
}

/// Immutable definition metadata, recorded at first call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: CodeUnitId,
    pub file: FileId,
    pub start_line: u32,
    pub end_line: u32,
    pub name: String,
}

/// Registry assigning ids and collecting definitions
#[derive(Debug, Default)]
pub struct CodeUnitRegistry {
    // Keyed on (file, start line); the rare same-position homonyms share a
    // bucket. Lookup on the per-call hot path allocates nothing.
    ids: HashMap<(FileId, u32), Vec<(String, CodeUnitId)>>,
    definitions: Vec<Definition>,
}

impl CodeUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or assign the id for a unit
    ///
    /// Idempotent for the same descriptor. A module body presented under the
    /// runtime's `<module>` spelling is recorded as `(module)`.
    pub fn identify(&mut self, descriptor: &UnitDescriptor<'_>) -> CodeUnitId {
        let bucket = self
            .ids
            .entry((descriptor.file, descriptor.start_line))
            .or_default();
        if let Some(&(_, id)) = bucket
            .iter()
            .find(|(name, _)| name.as_str() == descriptor.name)
        {
            return id;
        }
        let id = CodeUnitId(self.definitions.len() as u32 + 1);
        bucket.push((descriptor.name.to_string(), id));
        let name = if descriptor.name == MODULE_DESCRIPTOR_NAME {
            MODULE_NAME.to_string()
        } else {
            descriptor.name.to_string()
        };
        self.definitions.push(Definition {
            id,
            file: descriptor.file,
            start_line: descriptor.start_line,
            end_line: descriptor.end_line,
            name,
        });
        id
    }

    /// Definitions in assignment order, ids 1..=len
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    /// Consume the registry, yielding the definition list for the writer
    pub fn into_definitions(self) -> Vec<Definition> {
        self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(file: u32, line: u32, name: &str) -> UnitDescriptor<'_> {
        UnitDescriptor {
            file: FileId(file),
            start_line: line,
            end_line: line,
            name,
        }
    }

    #[test]
    fn test_ids_assigned_from_one() {
        let mut reg = CodeUnitRegistry::new();
        assert_eq!(reg.identify(&desc(0, 1, "main")), CodeUnitId(1));
        assert_eq!(reg.identify(&desc(0, 10, "helper")), CodeUnitId(2));
        assert_eq!(reg.identify(&desc(1, 1, "other")), CodeUnitId(3));
    }

    #[test]
    fn test_identify_idempotent() {
        let mut reg = CodeUnitRegistry::new();
        let first = reg.identify(&desc(0, 5, "f"));
        assert_eq!(reg.identify(&desc(0, 5, "f")), first);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_same_name_different_file_is_distinct() {
        let mut reg = CodeUnitRegistry::new();
        let a = reg.identify(&desc(0, 5, "f"));
        let b = reg.identify(&desc(1, 5, "f"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_module_body_renamed() {
        let mut reg = CodeUnitRegistry::new();
        reg.identify(&desc(0, 1, "<module>"));
        assert_eq!(reg.definitions()[0].name, MODULE_NAME);
    }

    #[test]
    fn test_definition_recorded_once_and_immutable() {
        let mut reg = CodeUnitRegistry::new();
        reg.identify(&desc(0, 3, "f"));
        reg.identify(&desc(0, 3, "f"));
        assert_eq!(reg.definitions().len(), 1);
        let def = &reg.definitions()[0];
        assert_eq!(def.id, CodeUnitId(1));
        assert_eq!(def.file, FileId(0));
        assert_eq!(def.start_line, 3);
        assert_eq!(def.name, "f");
    }
}
