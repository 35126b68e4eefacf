//! ELF symbol-table fallback used when a mapped file has no DWARF debug
//! info: `(name, stValue, size)` triples from `.symtab`/`.dynsym`,
//! looked up by containing range.

use object::{Object, ObjectSymbol};

use crate::demangle::demangle_any;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ElfSymbolEntry {
    pub value: u64,
    pub size: u64,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct ElfSymbolTable {
    entries: Vec<ElfSymbolEntry>,
}

impl ElfSymbolTable {
    pub fn load(path: &str, data: &[u8]) -> Result<Self> {
        let object_file = object::File::parse(data).map_err(|source| Error::MalformedElf {
            path: path.to_string(),
            source,
        })?;
        let mut entries: Vec<ElfSymbolEntry> = object_file
            .symbols()
            .chain(object_file.dynamic_symbols())
            .filter(|s| s.is_definition())
            .filter_map(|s| {
                let name = s.name().ok()?;
                Some(ElfSymbolEntry {
                    value: s.address(),
                    size: s.size(),
                    name: demangle_any(name),
                })
            })
            .collect();
        entries.sort_by_key(|e| e.value);
        Ok(ElfSymbolTable { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, address: u64) -> Option<&ElfSymbolEntry> {
        let idx = self.entries.partition_point(|e| e.value <= address);
        if idx == 0 {
            return None;
        }
        let candidate = &self.entries[idx - 1];
        if candidate.size == 0 || address < candidate.value + candidate.size {
            Some(candidate)
        } else {
            None
        }
    }
}
