//! DWARF CFI-driven frame walker: given a starting register file, a
//! captured user-stack blob and the sampled PID's symbol table, produces
//! the chain of return addresses by repeatedly evaluating the CFI row
//! covering the current PC and applying its register rules.

use std::collections::HashSet;

use qperf_symbols::ProcessSymbolTable;

use crate::arch::{Architecture, ArchTable};
use crate::cfi_row::{evaluate_row, SimpleRule};
use crate::error::{Error, Result};
use crate::memory::MemoryReader;
use crate::registers::RegisterFile;

/// One unwound frame. `pc` has already been adjusted by −1 for all but
/// the top/activation frame, matching the convention DWARF line lookups
/// expect (a return address points just past the call instruction).
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub pc: u64,
    pub is_activation: bool,
}

pub struct DwarfUnwinder<'a> {
    arch: &'static ArchTable,
    symbols: &'a mut ProcessSymbolTable,
    time: u64,
}

impl<'a> DwarfUnwinder<'a> {
    pub fn new(
        architecture: Architecture,
        symbols: &'a mut ProcessSymbolTable,
        time: u64,
    ) -> Self {
        DwarfUnwinder {
            arch: architecture.table(),
            symbols,
            time,
        }
    }

    pub fn for_architecture_name(
        name: &str,
        symbols: &'a mut ProcessSymbolTable,
        time: u64,
    ) -> Result<Self> {
        let architecture = Architecture::from_name(name)
            .ok_or_else(|| Error::UnknownArchitecture(name.to_string()))?;
        Ok(DwarfUnwinder::new(architecture, symbols, time))
    }

    /// Unwinds starting at `initial_pc` with `initial_registers` already
    /// populated from the sample's captured register set (IP excluded;
    /// set here from `initial_pc`). Retries once if the ELF/DWARF cache
    /// was invalidated mid-unwind by a newly-observed MMAP.
    pub fn unwind(
        &mut self,
        initial_pc: u64,
        initial_registers: &RegisterFile,
        stack_pointer: u64,
        stack_bytes: &[u8],
        max_frames: Option<usize>,
    ) -> Result<Vec<Frame>> {
        let mut registers = initial_registers.clone();
        registers.set(self.arch.dwarf_ip, initial_pc);

        let (frames, dirty) =
            self.unwind_once(initial_pc, registers.clone(), stack_pointer, stack_bytes, max_frames);
        if !dirty {
            return Ok(frames);
        }

        let (frames, dirty_again) =
            self.unwind_once(initial_pc, registers, stack_pointer, stack_bytes, max_frames);
        if dirty_again {
            return Err(Error::CacheInvalidatedTwice);
        }
        Ok(frames)
    }

    /// ARM/Thumb interworking: the first attempt uses the captured IP;
    /// if it only yields the one veneer frame, the LR-rewritten retry
    /// runs too. The veneer frame is kept and the tail is replaced with
    /// the retry's frames only if that retry chain is strictly longer.
    pub fn unwind_with_interworking_retry(
        &mut self,
        initial_pc: u64,
        initial_registers: &RegisterFile,
        stack_pointer: u64,
        stack_bytes: &[u8],
        max_frames: Option<usize>,
    ) -> Result<Vec<Frame>> {
        let first = self.unwind(
            initial_pc,
            initial_registers,
            stack_pointer,
            stack_bytes,
            max_frames,
        )?;
        if first.len() > 1 {
            return Ok(first);
        }
        let Some(lr) = self.arch.dwarf_lr.and_then(|r| initial_registers.get(r)) else {
            return Ok(first);
        };
        if lr == initial_pc {
            return Ok(first);
        }
        let retry = self.unwind(
            lr,
            initial_registers,
            stack_pointer,
            stack_bytes,
            max_frames,
        )?;
        if retry.len() > first.len() {
            let mut combined = Vec::with_capacity(1 + retry.len());
            if let Some(&veneer) = first.first() {
                combined.push(veneer);
            }
            combined.extend(retry);
            Ok(combined)
        } else {
            Ok(first)
        }
    }

    fn unwind_once(
        &mut self,
        initial_pc: u64,
        mut registers: RegisterFile,
        stack_pointer: u64,
        stack_bytes: &[u8],
        max_frames: Option<usize>,
    ) -> (Vec<Frame>, bool) {
        let mut frames = Vec::new();
        let mut reader = MemoryReader::new(stack_pointer, stack_bytes, self.symbols, self.time);
        let mut pc = initial_pc;
        let mut is_activation = true;
        let mut seen_pcs = HashSet::new();

        loop {
            if pc == 0 || !seen_pcs.insert(pc) {
                break;
            }
            let lookup_pc = if is_activation { pc } else { pc.wrapping_sub(1) };
            frames.push(Frame {
                pc: lookup_pc,
                is_activation,
            });
            is_activation = false;
            if let Some(max) = max_frames {
                if frames.len() >= max {
                    break;
                }
            }

            let Some((cfi, bias)) = reader.cfi_for(pc) else {
                break;
            };
            let static_pc = (pc as i64 + bias) as u64;
            let (bytes, is_eh) = match (&cfi.eh_frame, &cfi.debug_frame) {
                (Some(b), _) => (b.clone(), true),
                (None, Some(b)) => (b.clone(), false),
                (None, None) => break,
            };

            let ra_register = self.arch.dwarf_lr.unwrap_or(self.arch.dwarf_ip);
            let mut interest: Vec<u16> = registers.known_registers().collect();
            interest.push(self.arch.dwarf_ip);
            interest.push(self.arch.dwarf_sp);
            interest.push(ra_register);

            let Some(row) = evaluate_row(&bytes, is_eh, static_pc, &interest) else {
                break;
            };
            if row.cfa_is_expression {
                break;
            }
            let Some(cfa_register) = row.cfa_register else {
                break;
            };
            let Some(cfa_base) = registers.get(cfa_register) else {
                break;
            };
            let cfa = (cfa_base as i64 + row.cfa_offset) as u64;

            let mut new_registers = registers.clone();
            new_registers.set(self.arch.dwarf_sp, cfa);
            for (&dwarf_reg, rule) in &row.rules {
                match *rule {
                    SimpleRule::Undefined => new_registers.remove(dwarf_reg),
                    SimpleRule::SameValue | SimpleRule::Unsupported => {}
                    SimpleRule::Offset(offset) => {
                        let addr = (cfa as i64 + offset) as u64;
                        match reader.read_word(addr) {
                            Some(value) => new_registers.set(dwarf_reg, value),
                            None => new_registers.remove(dwarf_reg),
                        }
                    }
                    SimpleRule::ValOffset(offset) => {
                        new_registers.set(dwarf_reg, (cfa as i64 + offset) as u64);
                    }
                    SimpleRule::Register(source) => {
                        if let Some(value) = registers.get(source) {
                            new_registers.set(dwarf_reg, value);
                        }
                    }
                }
            }

            if reader.cache_dirty {
                return (frames, true);
            }

            let Some(return_address) = new_registers.get(ra_register) else {
                break;
            };
            new_registers.set(self.arch.dwarf_ip, return_address);
            registers = new_registers;
            pc = return_address;
        }

        (frames, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qperf_symbols::ProcessSymbolTable;

    #[test]
    fn stops_at_top_frame_without_cfi_data() {
        let mut symbols = ProcessSymbolTable::new(1234);
        let mut unwinder = DwarfUnwinder::new(Architecture::X86_64, &mut symbols, 0);
        let registers = RegisterFile::default();
        let frames = unwinder
            .unwind(0x4000, &registers, 0x7fff_0000, &[], None)
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_activation);
        assert_eq!(frames[0].pc, 0x4000);
    }

    #[test]
    fn interworking_retry_is_a_no_op_when_not_longer() {
        let mut symbols = ProcessSymbolTable::new(1234);
        let mut unwinder = DwarfUnwinder::new(Architecture::Arm, &mut symbols, 0);
        let mut registers = RegisterFile::default();
        registers.set(14, 0x5000); // lr
        let frames = unwinder
            .unwind_with_interworking_retry(0x4001, &registers, 0x7fff_0000, &[], None)
            .unwrap();
        // Neither attempt has CFI data to unwind past the veneer frame,
        // so the retry (same length) never replaces the first attempt.
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pc, 0x4001);
    }

    #[test]
    fn max_frames_caps_the_chain() {
        let mut symbols = ProcessSymbolTable::new(1234);
        let mut unwinder = DwarfUnwinder::new(Architecture::X86_64, &mut symbols, 0);
        let registers = RegisterFile::default();
        let frames = unwinder
            .unwind(0x4000, &registers, 0x7fff_0000, &[], Some(1))
            .unwrap();
        assert_eq!(frames.len(), 1);
    }
}
