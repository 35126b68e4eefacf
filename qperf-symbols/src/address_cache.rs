//! Per-PID address -> location cache, keyed by the *file-relative*
//! address under the originating ELF's canonical path rather than the
//! raw virtual address, so the same entry is reused across re-mmaps of
//! the same file at a different base. Grounded directly on
//! `PerfAddressCache` (`perfaddresscache.h`/`.cpp`).

use std::collections::HashMap;

use crate::elf_map::ElfInfo;

pub type LocationId = u32;

#[derive(Debug, Clone, Copy)]
pub struct AddressCacheEntry {
    pub location_id: LocationId,
    pub is_interworking: bool,
}

#[derive(Debug, Default)]
pub struct AddressCache {
    // originalPath -> (relative address -> entry)
    cache: HashMap<String, HashMap<u64, AddressCacheEntry>>,
}

fn relative_address(elf: &ElfInfo, addr: u64) -> u64 {
    debug_assert!(elf.addr <= addr);
    debug_assert!(elf.end() > addr);
    addr - elf.addr
}

impl AddressCache {
    pub fn new() -> Self {
        AddressCache {
            cache: HashMap::new(),
        }
    }

    pub fn find(&self, elf: &ElfInfo, addr: u64) -> Option<AddressCacheEntry> {
        self.cache
            .get(&*elf.original_path)
            .and_then(|per_file| per_file.get(&relative_address(elf, addr)))
            .copied()
    }

    pub fn insert(&mut self, elf: &ElfInfo, addr: u64, entry: AddressCacheEntry) {
        self.cache
            .entry(elf.original_path.to_string())
            .or_default()
            .insert(relative_address(elf, addr), entry);
    }

    /// Drops all cached entries. Called whenever `ElfMap::register_elf`
    /// reports that it invalidated existing coverage for this PID.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
