//! Memory-read callback for the unwind engine: a word at `addr` comes
//! from the captured user-stack blob if `addr` falls inside it, else
//! from the owning ELF's mapped section data, cached per address for
//! idempotence within one sample's unwind.

use std::collections::HashMap;

use qperf_symbols::{CfiSections, ProcessSymbolTable};

const PERF_CONTEXT_MAX: u64 = 0xffff_ffff_ffff_ff00;

pub struct MemoryReader<'a> {
    stack_pointer: u64,
    stack_bytes: &'a [u8],
    symbols: &'a mut ProcessSymbolTable,
    time: u64,
    cache: HashMap<u64, u64>,
    pub cache_dirty: bool,
}

impl<'a> MemoryReader<'a> {
    pub fn new(
        stack_pointer: u64,
        stack_bytes: &'a [u8],
        symbols: &'a mut ProcessSymbolTable,
        time: u64,
    ) -> Self {
        MemoryReader {
            stack_pointer,
            stack_bytes,
            symbols,
            time,
            cache: HashMap::new(),
            cache_dirty: false,
        }
    }

    /// Returns the little-endian 8-byte word at `addr`, or `None` if it
    /// is unreachable (above `PERF_CONTEXT_MAX`, outside the stack blob
    /// and outside any mapped ELF fragment).
    pub fn read_word(&mut self, addr: u64) -> Option<u64> {
        if addr >= PERF_CONTEXT_MAX {
            return None;
        }
        if let Some(&cached) = self.cache.get(&addr) {
            return Some(cached);
        }

        let word = self.read_from_stack(addr).or_else(|| {
            let was_mapped = self.symbols.is_address_mapped(addr, self.time);
            let result = self.symbols.read_elf_word(addr, self.time);
            if was_mapped && result.is_none() {
                // The fragment existed a moment ago but the word read
                // failed; treat as a cache-invalidating condition so the
                // caller restarts the unwind once.
                self.cache_dirty = true;
            }
            result
        });

        if let Some(w) = word {
            self.cache.insert(addr, w);
        }
        word
    }

    /// Delegates to the owning process's symbol table; exposed here
    /// rather than directly on `ProcessSymbolTable` so the unwind loop
    /// only ever needs one mutable handle into process state at a time.
    pub fn cfi_for(&mut self, addr: u64) -> Option<(CfiSections, i64)> {
        self.symbols.cfi_for(addr, self.time)
    }

    fn read_from_stack(&self, addr: u64) -> Option<u64> {
        if addr < self.stack_pointer {
            return None;
        }
        let offset = addr.checked_sub(self.stack_pointer)? as usize;
        let end = offset.checked_add(8)?;
        let slice = self.stack_bytes.get(offset..end)?;
        Some(u64::from_le_bytes(slice.try_into().ok()?))
    }
}
