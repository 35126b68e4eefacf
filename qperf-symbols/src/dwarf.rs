//! DWARF symbolization: a compilation-unit range index for dispatching an
//! address to its CU, a per-CU subprogram index built lazily on first
//! query, a DIE-offset name cache, and inline-scope expansion.
//!
//! Built directly on `gimli` rather than going through `addr2line` (the
//! approach `samply-symbols::dwarf` takes): the spec for this component
//! names the CU range index, subprogram index and DIE name cache as
//! required structures in their own right, so this module builds them
//! itself instead of relying on `addr2line`'s internal (private)
//! versions of the same thing. `gimli` is the same crate `addr2line`
//! itself is built on, so the dependency stack stays in the family the
//! teacher uses for DWARF work.

use std::collections::HashMap;
use std::rc::Rc;

use gimli::{EndianRcSlice, Reader, RunTimeEndian, UnitOffset};
use object::{Object, ObjectSection};

use crate::demangle::demangle_any;
use crate::error::{Error, Result};

pub type R = EndianRcSlice<RunTimeEndian>;

#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    pub address: u64,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Fully qualified, demangled function name.
    pub function_name: Option<String>,
    /// Call-site file/line/column for an inlined frame; `None` for the
    /// outermost (physical) frame.
    pub is_inline: bool,
}

struct Subprogram {
    low_pc: u64,
    high_pc: u64,
    die_offset: UnitOffset,
}

struct CuEntry {
    low_pc: u64,
    high_pc: u64,
    unit_index: usize,
}

/// Owns the DWARF sections for one ELF module (bias-adjusted addresses
/// are the caller's responsibility: this module works in file-relative,
/// not process-relative, address space).
pub struct DwarfModule {
    dwarf: gimli::Dwarf<R>,
    units: Vec<gimli::Unit<R>>,
    cu_index: Vec<CuEntry>,
    subprogram_index: HashMap<usize, Vec<Subprogram>>,
    die_name_cache: HashMap<(usize, usize), String>,
    has_line_program: HashMap<usize, bool>,
}

fn load_section<'data>(
    object_file: &object::File<'data>,
    id: gimli::SectionId,
) -> std::result::Result<R, gimli::Error> {
    let data = object_file
        .section_by_name(id.name())
        .and_then(|s| s.uncompressed_data().ok())
        .map(|cow| cow.into_owned())
        .unwrap_or_default();
    Ok(EndianRcSlice::new(Rc::from(data.into_boxed_slice()), endian(object_file)))
}

fn endian(object_file: &object::File) -> RunTimeEndian {
    if object_file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    }
}

impl DwarfModule {
    pub fn load(path: &str, data: &[u8]) -> Result<Self> {
        let object_file = object::File::parse(data).map_err(|source| Error::MalformedElf {
            path: path.to_string(),
            source,
        })?;

        let dwarf = gimli::Dwarf::load(|id| load_section(&object_file, id))
            .map_err(|source| Error::MalformedDwarf {
                path: path.to_string(),
                source,
            })?;

        let mut units = Vec::new();
        let mut cu_index = Vec::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next().map_err(|source| Error::MalformedDwarf {
            path: path.to_string(),
            source,
        })? {
            let unit = dwarf
                .unit(header)
                .map_err(|source| Error::MalformedDwarf {
                    path: path.to_string(),
                    source,
                })?;
            let unit_index = units.len();
            if let Some((low, high)) = cu_pc_range(&dwarf, &unit) {
                cu_index.push(CuEntry {
                    low_pc: low,
                    high_pc: high,
                    unit_index,
                });
            }
            units.push(unit);
        }

        Ok(DwarfModule {
            dwarf,
            units,
            cu_index,
            subprogram_index: HashMap::new(),
            die_name_cache: HashMap::new(),
            has_line_program: HashMap::new(),
        })
    }

    /// Returns the physical frame and every enclosing inlined frame for
    /// `address`, innermost first, ending with the physical subprogram.
    pub fn resolve(&mut self, address: u64) -> Result<Vec<ResolvedLocation>> {
        let Some(unit_index) = self.dispatch_cu(address) else {
            return Ok(Vec::new());
        };
        self.ensure_subprogram_index(unit_index)?;

        let subprogram = self.subprogram_index[&unit_index]
            .iter()
            .find(|s| s.low_pc <= address && address < s.high_pc);
        let Some(subprogram) = subprogram else {
            return Ok(Vec::new());
        };
        let die_offset = subprogram.die_offset;

        let (file, line, column) = self.line_table_lookup(unit_index, address)?;
        let function_name = self.qualified_name(unit_index, die_offset)?;

        let mut locations = self.inline_chain(unit_index, die_offset, address)?;
        locations.push(ResolvedLocation {
            address,
            file,
            line,
            column,
            function_name,
            is_inline: false,
        });
        Ok(locations)
    }

    fn dispatch_cu(&self, address: u64) -> Option<usize> {
        self.cu_index
            .iter()
            .find(|cu| cu.low_pc <= address && address < cu.high_pc)
            .map(|cu| cu.unit_index)
    }

    fn ensure_subprogram_index(&mut self, unit_index: usize) -> Result<()> {
        if self.subprogram_index.contains_key(&unit_index) {
            return Ok(());
        }
        let unit = &self.units[unit_index];
        let mut subprograms = Vec::new();
        let mut cursor = unit.entries();
        while let Some((_, entry)) = cursor.next_dfs().map_err(map_gimli_err)? {
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            if let Some((low, high)) = die_pc_range(&self.dwarf, unit, entry) {
                subprograms.push(Subprogram {
                    low_pc: low,
                    high_pc: high,
                    die_offset: entry.offset(),
                });
            }
        }
        self.subprogram_index.insert(unit_index, subprograms);
        Ok(())
    }

    /// Demangled, fully qualified name for a DIE: linkage name if present
    /// (demangled), otherwise a `::`-joined scope walk, following
    /// `DW_AT_specification` when a scope is a bare declaration.
    fn qualified_name(&mut self, unit_index: usize, die_offset: UnitOffset) -> Result<Option<String>> {
        let key = (unit_index, die_offset.0);
        if let Some(cached) = self.die_name_cache.get(&key) {
            return Ok(Some(cached.clone()));
        }

        let unit = &self.units[unit_index];
        let entry = unit.entry(die_offset).map_err(map_gimli_err)?;
        if let Some(linkage) = self.linkage_name(unit, &entry)? {
            let demangled = demangle_any(&linkage);
            self.die_name_cache.insert(key, demangled.clone());
            return Ok(Some(demangled));
        }

        let mut tree = unit.entries_tree(None).map_err(map_gimli_err)?;
        let root = tree.root().map_err(map_gimli_err)?;
        let mut cache_updates = Vec::new();
        let found = walk_for_name(
            &self.dwarf,
            unit,
            root,
            Vec::new(),
            die_offset,
            &mut cache_updates,
        )?;
        for (offset, name) in cache_updates {
            self.die_name_cache.insert((unit_index, offset.0), name);
        }
        Ok(found)
    }

    fn linkage_name(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
    ) -> Result<Option<String>> {
        for attr_name in [gimli::DW_AT_linkage_name, gimli::DW_AT_MIPS_linkage_name] {
            if let Some(attr) = entry.attr(attr_name).map_err(map_gimli_err)? {
                if let Ok(s) = self.dwarf.attr_string(unit, attr.value()) {
                    if let Ok(text) = s.to_string_lossy() {
                        return Ok(Some(text.into_owned()));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Walks the DIE subtree of `die_offset`'s enclosing subprogram to
    /// find every `DW_TAG_inlined_subroutine` whose ranges contain
    /// `address`. Returns them innermost-first (but before the physical
    /// frame, which the caller appends).
    fn inline_chain(
        &mut self,
        unit_index: usize,
        subprogram_offset: UnitOffset,
        address: u64,
    ) -> Result<Vec<ResolvedLocation>> {
        let unit = &self.units[unit_index];
        let mut tree = unit.entries_tree(Some(subprogram_offset)).map_err(map_gimli_err)?;
        let root = tree.root().map_err(map_gimli_err)?;
        let mut chain = Vec::new();
        collect_inlines(&self.dwarf, unit, root, address, &mut chain)?;
        // collect_inlines appends outer-to-inner as it descends; reverse
        // so the innermost inlined call is first.
        chain.reverse();

        let mut out = Vec::with_capacity(chain.len());
        for inlined in chain {
            let function_name = self.qualified_name(unit_index, inlined.abstract_origin)?;
            out.push(ResolvedLocation {
                address,
                file: inlined.call_file,
                line: inlined.call_line,
                column: inlined.call_column,
                function_name,
                is_inline: true,
            });
        }
        Ok(out)
    }

    fn line_table_lookup(
        &mut self,
        unit_index: usize,
        address: u64,
    ) -> Result<(Option<String>, Option<u32>, Option<u32>)> {
        let unit = &self.units[unit_index];
        let Some(program) = unit.line_program.clone() else {
            return Ok((None, None, None));
        };
        let mut rows = program.rows();
        let mut best: Option<(u64, Option<String>, Option<u32>, Option<u32>)> = None;
        while let Some((header, row)) = rows.next_row().map_err(map_gimli_err)? {
            if row.address() > address {
                continue;
            }
            if best.as_ref().is_some_and(|(a, ..)| *a > row.address()) {
                continue;
            }
            let file = row
                .file(header)
                .and_then(|f| self.dwarf.attr_string(unit, f.path_name()).ok())
                .and_then(|s| s.to_string_lossy().ok())
                .map(|s| s.into_owned());
            let line = row.line().map(|l| l.get() as u32);
            let column = match row.column() {
                gimli::ColumnType::LeftEdge => None,
                gimli::ColumnType::Column(c) => Some(c.get() as u32),
            };
            best = Some((row.address(), file, line, column));
        }
        match best {
            Some((_, file, line, column)) => Ok((file, line, column)),
            None => Ok((None, None, None)),
        }
    }
}

fn map_gimli_err(source: gimli::Error) -> Error {
    Error::MalformedDwarf {
        path: String::new(),
        source,
    }
}

fn cu_pc_range(dwarf: &gimli::Dwarf<R>, unit: &gimli::Unit<R>) -> Option<(u64, u64)> {
    let mut tree = unit.entries_tree(None).ok()?;
    let root = tree.root().ok()?;
    die_pc_range(dwarf, unit, root.entry())
}

fn die_pc_range(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &gimli::DebuggingInformationEntry<R>,
) -> Option<(u64, u64)> {
    let mut ranges = dwarf.die_ranges(unit, entry).ok()?;
    let mut low = None;
    let mut high = None;
    while let Ok(Some(range)) = ranges.next() {
        low = Some(low.map_or(range.begin, |l: u64| l.min(range.begin)));
        high = Some(high.map_or(range.end, |h: u64| h.max(range.end)));
    }
    match (low, high) {
        (Some(l), Some(h)) if h > l => Some((l, h)),
        _ => None,
    }
}

fn scope_name(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &gimli::DebuggingInformationEntry<R>,
) -> Option<String> {
    match entry.tag() {
        gimli::DW_TAG_namespace
        | gimli::DW_TAG_class_type
        | gimli::DW_TAG_structure_type
        | gimli::DW_TAG_union_type
        | gimli::DW_TAG_subprogram => {}
        _ => return None,
    }
    if let Ok(Some(attr)) = entry.attr(gimli::DW_AT_name) {
        if let Ok(s) = dwarf.attr_string(unit, attr.value()) {
            return s.to_string_lossy().ok().map(|s| s.into_owned());
        }
    }
    // Bare declaration: follow DW_AT_specification one hop for a name.
    if let Ok(Some(attr)) = entry.attr(gimli::DW_AT_specification) {
        if let gimli::AttributeValue::UnitRef(offset) = attr.value() {
            if let Ok(spec_entry) = unit.entry(offset) {
                if let Ok(Some(name_attr)) = spec_entry.attr(gimli::DW_AT_name) {
                    if let Ok(s) = dwarf.attr_string(unit, name_attr.value()) {
                        return s.to_string_lossy().ok().map(|s| s.into_owned());
                    }
                }
            }
        }
    }
    None
}

fn walk_for_name(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    mut node: gimli::EntriesTreeNode<R>,
    mut scope_stack: Vec<String>,
    target: UnitOffset,
    cache_updates: &mut Vec<(UnitOffset, String)>,
) -> Result<Option<String>> {
    let entry = node.entry().clone();
    if let Some(name) = scope_name(dwarf, unit, &entry) {
        scope_stack.push(name);
        let full = scope_stack.join("::");
        cache_updates.push((entry.offset(), full.clone()));
        if entry.offset() == target {
            return Ok(Some(full));
        }
    } else if entry.offset() == target {
        return Ok(Some(scope_stack.join("::")));
    }

    let mut children = node.children();
    while let Some(child) = children.next().map_err(map_gimli_err)? {
        if let Some(found) = walk_for_name(
            dwarf,
            unit,
            child,
            scope_stack.clone(),
            target,
            cache_updates,
        )? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

struct InlineFrame {
    abstract_origin: UnitOffset,
    call_file: Option<String>,
    call_line: Option<u32>,
    call_column: Option<u32>,
}

fn collect_inlines(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    mut node: gimli::EntriesTreeNode<R>,
    address: u64,
    out: &mut Vec<InlineFrame>,
) -> Result<()> {
    let mut children = node.children();
    while let Some(child) = children.next().map_err(map_gimli_err)? {
        let entry = child.entry().clone();
        if entry.tag() == gimli::DW_TAG_inlined_subroutine {
            if let Some((low, high)) = die_pc_range(dwarf, unit, &entry) {
                if low <= address && address < high {
                    let abstract_origin = entry
                        .attr(gimli::DW_AT_abstract_origin)
                        .map_err(map_gimli_err)?
                        .and_then(|a| match a.value() {
                            gimli::AttributeValue::UnitRef(offset) => Some(offset),
                            _ => None,
                        })
                        .unwrap_or(entry.offset());
                    let call_file = entry
                        .attr(gimli::DW_AT_call_file)
                        .ok()
                        .flatten()
                        .and_then(|a| a.udata_value())
                        .and_then(|file_index| {
                            unit.line_program.as_ref().and_then(|lp| {
                                lp.header().file(file_index).and_then(|f| {
                                    dwarf
                                        .attr_string(unit, f.path_name())
                                        .ok()
                                        .and_then(|s| s.to_string_lossy().ok())
                                        .map(|s| s.into_owned())
                                })
                            })
                        });
                    let call_line = entry
                        .attr(gimli::DW_AT_call_line)
                        .ok()
                        .flatten()
                        .and_then(|a| a.udata_value())
                        .map(|v| v as u32);
                    let call_column = entry
                        .attr(gimli::DW_AT_call_column)
                        .ok()
                        .flatten()
                        .and_then(|a| a.udata_value())
                        .map(|v| v as u32);
                    out.push(InlineFrame {
                        abstract_origin,
                        call_file,
                        call_line,
                        call_column,
                    });
                    // Recurse to find any deeper-nested inlined calls.
                    collect_inlines(dwarf, unit, child, address, out)?;
                    return Ok(());
                }
            }
        } else {
            collect_inlines(dwarf, unit, child, address, out)?;
        }
    }
    Ok(())
}
