//! Extracts one CFI row (CFA rule + register rules) out of `gimli`'s
//! borrowed `UnwindTableRow` into an owned, lifetime-free form, so the
//! rest of the unwinder doesn't have to thread `gimli::Reader` generics
//! and borrows of the section bytes through every call.

use std::collections::HashMap;

use gimli::{
    BaseAddresses, CfaRule, DebugFrame, EhFrame, EndianSlice, Register, RegisterRule,
    RunTimeEndian, UnwindContext, UnwindSection,
};

#[derive(Debug, Clone, Copy)]
pub enum SimpleRule {
    Undefined,
    SameValue,
    Offset(i64),
    ValOffset(i64),
    Register(u16),
    /// DWARF expression based rules: evaluating arbitrary CFI
    /// expressions is not implemented, so these registers are left at
    /// their previous value rather than invented.
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct UnwindRow {
    pub cfa_register: Option<u16>,
    pub cfa_offset: i64,
    pub cfa_is_expression: bool,
    pub rules: HashMap<u16, SimpleRule>,
}

fn simplify(rule: RegisterRule<EndianSlice<RunTimeEndian>>) -> SimpleRule {
    match rule {
        RegisterRule::Undefined => SimpleRule::Undefined,
        RegisterRule::SameValue => SimpleRule::SameValue,
        RegisterRule::Offset(o) => SimpleRule::Offset(o),
        RegisterRule::ValOffset(o) => SimpleRule::ValOffset(o),
        RegisterRule::Register(r) => SimpleRule::Register(r.0),
        _ => SimpleRule::Unsupported,
    }
}

/// Evaluates the CFI row covering `static_pc` out of `.eh_frame` or
/// `.debug_frame` bytes, for every register number in `registers_of_interest`.
pub fn evaluate_row(
    bytes: &[u8],
    is_eh_frame: bool,
    static_pc: u64,
    registers_of_interest: &[u16],
) -> Option<UnwindRow> {
    let mut ctx = UnwindContext::new();
    let bases = BaseAddresses::default();

    if is_eh_frame {
        let eh_frame = EhFrame::new(bytes, RunTimeEndian::Little);
        let row = eh_frame
            .unwind_info_for_address(&bases, &mut ctx, static_pc, EhFrame::cie_from_offset)
            .ok()?;
        Some(extract(row, registers_of_interest))
    } else {
        let debug_frame = DebugFrame::new(bytes, RunTimeEndian::Little);
        let row = debug_frame
            .unwind_info_for_address(&bases, &mut ctx, static_pc, DebugFrame::cie_from_offset)
            .ok()?;
        Some(extract(row, registers_of_interest))
    }
}

fn extract(
    row: &gimli::UnwindTableRow<EndianSlice<RunTimeEndian>>,
    registers_of_interest: &[u16],
) -> UnwindRow {
    let (cfa_register, cfa_offset, cfa_is_expression) = match row.cfa() {
        CfaRule::RegisterAndOffset { register, offset } => (Some(register.0), *offset, false),
        CfaRule::Expression(_) => (None, 0, true),
    };

    let mut rules = HashMap::new();
    for &reg in registers_of_interest {
        rules.insert(reg, simplify(row.register(Register(reg))));
    }

    UnwindRow {
        cfa_register,
        cfa_offset,
        cfa_is_expression,
        rules,
    }
}
