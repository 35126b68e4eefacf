//! Dense 32-bit interning tables. Each `intern` call returns `(id,
//! is_new)`; the caller emits a definition frame only when `is_new` is
//! true, matching the "definition before every reference" discipline
//! the wire format requires.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct StringTable {
    ids: HashMap<Vec<u8>, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, bytes: &[u8]) -> (u32, bool) {
        if let Some(&id) = self.ids.get(bytes) {
            return (id, false);
        }
        let id = self.ids.len() as u32;
        self.ids.insert(bytes.to_vec(), id);
        (id, true)
    }
}

/// The identity of a `LocationDefinition`: a physical or inlined frame
/// at a given address, optionally pointing at the scope it was inlined
/// into. `pid` disambiguates the same address in different processes'
/// (or the kernel's) address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationKey {
    pub address: u64,
    pub file_string_id: Option<u32>,
    pub pid: i32,
    pub line: i32,
    pub column: i32,
    pub parent_location_id: Option<u32>,
}

#[derive(Debug, Default)]
pub struct LocationTable {
    ids: HashMap<LocationKey, u32>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, key: LocationKey) -> (u32, bool) {
        if let Some(&id) = self.ids.get(&key) {
            return (id, false);
        }
        let id = self.ids.len() as u32;
        self.ids.insert(key, id);
        (id, true)
    }
}

/// Identifies an `Attr` by its type/config pair, the same pair a
/// `PERF_RECORD_SAMPLE`'s owning attribute is looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub attr_type: u32,
    pub config: u64,
}

#[derive(Debug, Default)]
pub struct AttributeTable {
    ids: HashMap<AttributeKey, u32>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, key: AttributeKey) -> (u32, bool) {
        if let Some(&id) = self.ids.get(&key) {
            return (id, false);
        }
        let id = self.ids.len() as u32;
        self.ids.insert(key, id);
        (id, true)
    }
}

/// Gates `SymbolDefinition` re-emission: a symbol is keyed by the
/// `locationId` it resolves, not by its own id (no id is handed back to
/// the caller for it).
#[derive(Debug, Default)]
pub struct SymbolGate {
    seen: HashSet<u32>,
}

impl SymbolGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `location_id` is marked, `false`
    /// on every subsequent call.
    pub fn mark(&mut self, location_id: u32) -> bool {
        self.seen.insert(location_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_table_reuses_ids_for_identical_bytes() {
        let mut table = StringTable::new();
        let (id_a, new_a) = table.intern(b"hello");
        let (id_b, new_b) = table.intern(b"hello");
        assert_eq!(id_a, id_b);
        assert!(new_a);
        assert!(!new_b);
    }

    #[test]
    fn location_table_distinguishes_by_full_key() {
        let mut table = LocationTable::new();
        let key_a = LocationKey {
            address: 0x1000,
            file_string_id: Some(0),
            pid: 1,
            line: 10,
            column: 0,
            parent_location_id: None,
        };
        let key_b = LocationKey { pid: 2, ..key_a };
        let (id_a, _) = table.intern(key_a);
        let (id_b, _) = table.intern(key_b);
        assert_ne!(id_a, id_b);
        let (id_a_again, is_new) = table.intern(key_a);
        assert_eq!(id_a, id_a_again);
        assert!(!is_new);
    }

    #[test]
    fn symbol_gate_marks_once_per_location() {
        let mut gate = SymbolGate::new();
        assert!(gate.mark(5));
        assert!(!gate.mark(5));
        assert!(gate.mark(6));
    }
}
