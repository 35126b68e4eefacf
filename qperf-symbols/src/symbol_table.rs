//! Per-process symbol table: owns the PID's ELF map (C2), one DWARF
//! module per currently-live ELF, the file-relative address cache, and a
//! `perf-<pid>.map` reader for JIT frames. One dedicated instance
//! represents the kernel (`KERNEL_PID`), backed by `/proc/kallsyms`
//! instead of an ELF map.

use std::collections::HashMap;
use std::fs;
use std::io::BufReader;
use std::sync::Arc;

use memmap2::Mmap;

use object::Object;

use crate::address_cache::{AddressCache, AddressCacheEntry, LocationId};
use crate::cfi::CfiSections;
use crate::dwarf::DwarfModule;
use crate::elf_map::{ElfInfo, ElfMap};
use crate::elf_symtab::ElfSymbolTable;
use crate::error::Diagnostic;
use crate::kallsyms::KallsymsTable;
use crate::perf_map::PerfMap;

pub const KERNEL_PID: i32 = -1;

#[derive(Debug, Clone)]
pub struct Location {
    pub address: u64,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub function_name: Option<String>,
    pub binary_path: Option<String>,
    pub is_kernel: bool,
}

enum LoadedModule {
    WithDwarf {
        dwarf: DwarfModule,
        symtab: Option<ElfSymbolTable>,
    },
    SymtabOnly(ElfSymbolTable),
    Missing,
}

/// Resolves a process- or kernel-relative address to its symbol chain.
/// Created on first reference to a PID, destroyed at program end.
pub struct ProcessSymbolTable {
    pid: i32,
    elf_map: ElfMap,
    modules: HashMap<String, LoadedModule>,
    // Memory-mapped file for every module that was at least opened, kept
    // around so the unwinder's memory-read callback can serve a word
    // out of a mapped section without reopening the file.
    raw_bytes: HashMap<String, Arc<Mmap>>,
    cfi: HashMap<String, CfiSections>,
    // File-relative address cache, grounded on PerfAddressCache; the
    // location ids it hands back belong to this crate's caller (the
    // output stream's interning table assigns the real dense ids).
    address_cache: AddressCache,
    perf_map: Option<PerfMap>,
    kernel_symbols: Option<KallsymsTable>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ProcessSymbolTable {
    pub fn new(pid: i32) -> Self {
        ProcessSymbolTable {
            pid,
            elf_map: ElfMap::new(),
            modules: HashMap::new(),
            raw_bytes: HashMap::new(),
            cfi: HashMap::new(),
            address_cache: AddressCache::new(),
            perf_map: None,
            kernel_symbols: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn new_kernel(kallsyms_path: Option<&str>) -> Self {
        let mut table = ProcessSymbolTable::new(KERNEL_PID);
        let path = kallsyms_path.unwrap_or("/proc/kallsyms");
        match fs::File::open(path) {
            Ok(file) => match KallsymsTable::parse(BufReader::new(file)) {
                Ok(k) => table.kernel_symbols = Some(k),
                Err(_) => table.diagnostics.push(Diagnostic::InvalidKallsyms {
                    reason: format!("could not parse {path}"),
                }),
            },
            Err(_) => table.diagnostics.push(Diagnostic::InvalidKallsyms {
                reason: format!("could not open {path}"),
            }),
        }
        table
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn is_kernel(&self) -> bool {
        self.pid == KERNEL_PID
    }

    /// Registers an MMAP/MMAP2-derived region; drops the address cache if
    /// the registration invalidated existing coverage.
    pub fn register_elf(
        &mut self,
        addr: u64,
        len: u64,
        pgoff: u64,
        time: u64,
        original_path: &str,
        local_path: Option<&str>,
    ) {
        let invalidated = self.elf_map.register_elf(
            addr,
            len,
            pgoff,
            time,
            Arc::from(original_path),
            local_path.map(Arc::from),
        );
        if invalidated {
            self.address_cache.clear();
        }
    }

    pub fn set_perf_map(&mut self, map: PerfMap) {
        self.perf_map = Some(map);
    }

    /// Returns the caller's previously cached dense location id for
    /// `address`, if this PID's governing ELF already had it resolved and
    /// interned once. `is_interworking` is never set by this unwinder (the
    /// ARM veneer retry compares whole call-chain length rather than
    /// tagging individual frames) so a cached entry's flag is always
    /// `false`.
    pub fn cached_location(&self, address: u64, time: u64) -> Option<AddressCacheEntry> {
        let elf = self.elf_map.find_elf(address, time)?;
        self.address_cache.find(elf, address)
    }

    /// Records the caller's dense id for `address` against this PID's
    /// governing ELF, so a later `cached_location` call for the same
    /// address can skip re-resolving and re-interning it.
    pub fn cache_location(&mut self, address: u64, time: u64, location_id: LocationId) {
        let Some(elf) = self.elf_map.find_elf(address, time).cloned() else {
            return;
        };
        self.address_cache.insert(
            &elf,
            address,
            AddressCacheEntry {
                location_id,
                is_interworking: false,
            },
        );
    }

    /// Returns the chain of locations for `address`, innermost inlined
    /// frame first, physical frame last. Never fails: an unresolvable
    /// address yields a single location with no function name.
    pub fn resolve(&mut self, address: u64, time: u64) -> Vec<Location> {
        if self.is_kernel() {
            return vec![self.resolve_kernel(address)];
        }

        let Some(elf) = self.elf_map.find_elf(address, time).cloned() else {
            return vec![self.resolve_without_elf(address)];
        };

        self.ensure_module_loaded(&elf);
        let file_relative = (address - elf.addr) + elf.pgoff;
        self.resolve_in_module(&elf, address, file_relative)
    }

    /// Finds the ELF fragment covering `address` at `time` and returns a
    /// little-endian 8-byte word read from the raw file contents at the
    /// corresponding file-relative offset. Used by the unwinder's memory
    /// read callback when the requested address is outside the captured
    /// stack blob.
    pub fn read_elf_word(&mut self, address: u64, time: u64) -> Option<u64> {
        let elf = self.elf_map.find_elf(address, time)?.clone();
        self.ensure_module_loaded(&elf);
        let file_relative = (address - elf.addr) + elf.pgoff;
        let bytes = self.raw_bytes.get(&elf.original_path.to_string())?;
        let start = file_relative as usize;
        let end = start.checked_add(8)?;
        let slice = bytes.get(start..end)?;
        Some(u64::from_le_bytes(slice.try_into().ok()?))
    }

    pub fn is_address_mapped(&self, address: u64, time: u64) -> bool {
        self.elf_map.find_elf(address, time).is_some()
    }

    /// Returns the CFI sections and `(runtime -> static file address)`
    /// bias for the module covering `address` at `time`, for the
    /// unwinder to build its own `gimli` unwind context against. The
    /// bias matches the file-relative convention used throughout this
    /// crate: `static = runtime - elf.addr + elf.pgoff`.
    pub fn cfi_for(&mut self, address: u64, time: u64) -> Option<(CfiSections, i64)> {
        let elf = self.elf_map.find_elf(address, time)?.clone();
        self.ensure_module_loaded(&elf);
        let key = elf.original_path.to_string();
        let cfi = self.cfi.get(&key)?.clone();
        let bias = elf.pgoff as i64 - elf.addr as i64;
        Some((cfi, bias))
    }

    fn resolve_without_elf(&self, address: u64) -> Location {
        if let Some(entry) = self.perf_map.as_ref().and_then(|m| m.find(address)) {
            return Location {
                address,
                file: None,
                line: None,
                column: None,
                function_name: Some(entry.name.clone()),
                binary_path: None,
                is_kernel: false,
            };
        }
        Location {
            address,
            file: None,
            line: None,
            column: None,
            function_name: None,
            binary_path: None,
            is_kernel: false,
        }
    }

    fn resolve_kernel(&mut self, address: u64) -> Location {
        let found = self
            .kernel_symbols
            .as_ref()
            .and_then(|table| table.find(address))
            .cloned();
        match found {
            Some(entry) => Location {
                address,
                file: None,
                line: None,
                column: None,
                function_name: Some(entry.name),
                binary_path: if entry.module.is_empty() {
                    None
                } else {
                    Some(entry.module)
                },
                is_kernel: true,
            },
            None => Location {
                address,
                file: None,
                line: None,
                column: None,
                function_name: None,
                binary_path: None,
                is_kernel: true,
            },
        }
    }

    fn ensure_module_loaded(&mut self, elf: &ElfInfo) {
        let key = elf.original_path.to_string();
        if self.modules.contains_key(&key) {
            return;
        }
        let path = elf
            .local_path
            .as_deref()
            .unwrap_or(&elf.original_path)
            .to_string();
        let mmap = fs::File::open(&path).and_then(|file| unsafe { Mmap::map(&file) });
        let module = match mmap {
            Ok(mmap) => {
                let mmap = Arc::new(mmap);
                self.raw_bytes.insert(key.clone(), mmap.clone());
                if let Ok(object_file) = object::File::parse(&mmap[..]) {
                    self.cfi.insert(key.clone(), CfiSections::load(&object_file));
                }
                match DwarfModule::load(&path, &mmap) {
                    Ok(dwarf) => LoadedModule::WithDwarf {
                        dwarf,
                        symtab: ElfSymbolTable::load(&path, &mmap).ok(),
                    },
                    Err(_) => match ElfSymbolTable::load(&path, &mmap) {
                        Ok(symtab) => LoadedModule::SymtabOnly(symtab),
                        Err(_) => {
                            self.diagnostics
                                .push(Diagnostic::MissingElfFile { path: path.clone() });
                            LoadedModule::Missing
                        }
                    },
                }
            }
            Err(_) => {
                self.diagnostics
                    .push(Diagnostic::MissingElfFile { path: path.clone() });
                LoadedModule::Missing
            }
        };
        self.modules.insert(key, module);
    }

    fn resolve_in_module(
        &mut self,
        elf: &ElfInfo,
        address: u64,
        file_relative: u64,
    ) -> Vec<Location> {
        let binary_path = Some(elf.original_path.to_string());
        let key = elf.original_path.to_string();

        let fallback = |binary_path: Option<String>| {
            vec![Location {
                address,
                file: None,
                line: None,
                column: None,
                function_name: None,
                binary_path,
                is_kernel: false,
            }]
        };

        match self.modules.get_mut(&key) {
            None | Some(LoadedModule::Missing) => fallback(binary_path),
            Some(LoadedModule::SymtabOnly(symtab)) => {
                let function_name = symtab.find(file_relative).map(|e| e.name.clone());
                if function_name.is_none() {
                    return fallback(binary_path);
                }
                vec![Location {
                    address,
                    file: None,
                    line: None,
                    column: None,
                    function_name,
                    binary_path,
                    is_kernel: false,
                }]
            }
            Some(LoadedModule::WithDwarf { dwarf, symtab }) => {
                let resolved = dwarf.resolve(file_relative).unwrap_or_default();
                if resolved.is_empty() {
                    let function_name = symtab
                        .as_ref()
                        .and_then(|s| s.find(file_relative))
                        .map(|e| e.name.clone());
                    if function_name.is_none() {
                        return fallback(binary_path);
                    }
                    return vec![Location {
                        address,
                        file: None,
                        line: None,
                        column: None,
                        function_name,
                        binary_path,
                        is_kernel: false,
                    }];
                }
                // DwarfModule::resolve already returns demangled names.
                resolved
                    .into_iter()
                    .map(|loc| Location {
                        address,
                        file: loc.file,
                        line: loc.line,
                        column: loc.column,
                        function_name: loc.function_name,
                        binary_path: binary_path.clone(),
                        is_kernel: false,
                    })
                    .collect()
            }
        }
    }
}
