//! `/proc/kallsyms`-format parsing, grounded on
//! `samply`'s `linux_shared::kernel_symbols::KallSymIter` for the
//! overall iterator shape and on the original `perfkallsyms.cpp` for the
//! exact module-suffix handling: a line is `<hex addr> <type> <name>`,
//! optionally followed by a tab and a `[module]` name.

use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KallsymEntry {
    pub address: u64,
    pub name: String,
    /// Empty when the symbol belongs to the kernel image itself rather
    /// than a loadable module.
    pub module: String,
}

/// A sorted-by-address kernel symbol table supporting upper-bound lookup.
#[derive(Debug, Clone, Default)]
pub struct KallsymsTable {
    entries: Vec<KallsymEntry>,
}

impl KallsymsTable {
    pub fn parse<R: BufRead>(r: R) -> crate::error::Result<Self> {
        let mut entries = Vec::new();
        for line in r.lines() {
            let line = line?;
            if let Some(entry) = parse_line(&line) {
                if entry.address != 0 {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by_key(|e| e.address);
        Ok(KallsymsTable { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry whose address is the greatest one `<= address`,
    /// mirroring the original's `std::upper_bound` then step-back.
    pub fn find(&self, address: u64) -> Option<&KallsymEntry> {
        let idx = self.entries.partition_point(|e| e.address <= address);
        if idx == 0 {
            return None;
        }
        Some(&self.entries[idx - 1])
    }
}

fn parse_line(line: &str) -> Option<KallsymEntry> {
    // "<addr> <type> <name>[\t<module>]"
    let mut space_parts = line.splitn(3, ' ');
    let addr_str = space_parts.next()?;
    let _type_char = space_parts.next()?;
    let rest = space_parts.next()?;

    let address = u64::from_str_radix(addr_str, 16).ok()?;

    let (name, module) = match rest.find('\t') {
        Some(tab_idx) => {
            let name = &rest[..tab_idx];
            let module_field = rest[tab_idx + 1..].trim();
            let module = module_field
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            (name.to_string(), module)
        }
        None => (rest.trim_end().to_string(), String::new()),
    };

    Some(KallsymEntry {
        address,
        name,
        module,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "ffffffff810002b8 T _stext\nffffffff81001040 t xen_hypercall_set_gdt\nffffffffa0000e80 T serio_interrupt\t[serio]\n";

    #[test]
    fn e3_kallsyms_lookup() {
        let table = KallsymsTable::parse(Cursor::new(SAMPLE)).unwrap();

        let found = table.find(0xffffffff81001140).unwrap();
        assert_eq!(found.address, 0xffffffff81001040);
        assert_eq!(found.name, "xen_hypercall_set_gdt");
        assert_eq!(found.module, "");

        let found = table.find(0xffffffffa0000e80).unwrap();
        assert_eq!(found.name, "serio_interrupt");
        assert_eq!(found.module, "serio");
    }

    #[test]
    fn zero_address_entries_are_skipped() {
        let table = KallsymsTable::parse(Cursor::new("0000000000000000 A ignore_me\n")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn lookup_before_first_entry_returns_none() {
        let table = KallsymsTable::parse(Cursor::new(SAMPLE)).unwrap();
        assert!(table.find(0x10).is_none());
    }
}
