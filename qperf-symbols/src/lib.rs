//! ELF/DWARF interval mapping, symbolization, demangling and kernel
//! symbol lookup.

mod address_cache;
mod cfi;
mod demangle;
mod dwarf;
mod elf_map;
mod elf_symtab;
mod error;
mod kallsyms;
mod perf_map;
mod symbol_table;

pub use address_cache::{AddressCache, AddressCacheEntry, LocationId};
pub use cfi::CfiSections;
pub use demangle::demangle_any;
pub use dwarf::{DwarfModule, ResolvedLocation};
pub use elf_map::{ElfInfo, ElfMap, TIME_OVERWRITTEN_NEVER};
pub use elf_symtab::{ElfSymbolEntry, ElfSymbolTable};
pub use error::{Diagnostic, Error, Result};
pub use kallsyms::{KallsymEntry, KallsymsTable};
pub use perf_map::{PerfMap, PerfMapEntry};
pub use symbol_table::{Location, ProcessSymbolTable, KERNEL_PID};
