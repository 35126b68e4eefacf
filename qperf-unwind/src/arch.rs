//! Per-architecture register tables: how perf's captured-register array
//! maps onto DWARF register numbers, which indices hold IP/SP/LR, and
//! which DWARF registers perf never reports and so must be zero-filled.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Arm,
    Aarch64,
    X86,
    X86_64,
}

impl Architecture {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "arm" | "armv7" | "armv7l" => Some(Architecture::Arm),
            "arm64" | "aarch64" => Some(Architecture::Aarch64),
            "x86" | "i386" | "i686" => Some(Architecture::X86),
            "x86_64" | "x86-64" | "amd64" => Some(Architecture::X86_64),
            _ => None,
        }
    }

    pub fn table(self) -> &'static ArchTable {
        match self {
            Architecture::Arm => &ARM,
            Architecture::Aarch64 => &AARCH64,
            Architecture::X86 => &X86,
            Architecture::X86_64 => &X86_64,
        }
    }
}

/// `perf_to_dwarf[perf_register_index]` is the DWARF register number that
/// perf-register-index corresponds to, or `None` if perf never reports a
/// DWARF-relevant value for it (segment registers, flags, …).
pub struct ArchTable {
    pub perf_to_dwarf: &'static [Option<u16>],
    pub perf_ip_index: usize,
    pub perf_sp_index: usize,
    pub dwarf_ip: u16,
    pub dwarf_sp: u16,
    pub dwarf_lr: Option<u16>,
    /// `(low, high)` DWARF register ranges perf never supplies; a fresh
    /// unwind's register file zero-fills them rather than leaving them
    /// unset, matching what a fully-populated `ucontext_t` would give.
    pub zero_fill_dwarf_ranges: &'static [(u16, u16)],
}

// PERF_REG_X86_64: AX DX CX BX SI DI BP SP IP FLAGS CS SS DS ES FS GS R8..R15.
const X86_64: ArchTable = ArchTable {
    perf_to_dwarf: &[
        Some(0),  // AX  -> rax
        Some(1),  // DX  -> rdx (perf index 1 is actually DX on x86_64 layout)
        Some(2),  // CX  -> rcx
        Some(3),  // BX  -> rbx
        Some(4),  // SI  -> rsi
        Some(5),  // DI  -> rdi
        Some(6),  // BP  -> rbp
        Some(7),  // SP  -> rsp
        None,     // IP handled via dwarf_ip, not a plain register slot
        None,     // FLAGS
        None,     // CS
        None,     // SS
        None,     // DS
        None,     // ES
        None,     // FS
        None,     // GS
        Some(8),  // R8
        Some(9),  // R9
        Some(10), // R10
        Some(11), // R11
        Some(12), // R12
        Some(13), // R13
        Some(14), // R14
        Some(15), // R15
    ],
    perf_ip_index: 8,
    perf_sp_index: 7,
    dwarf_ip: 16,
    dwarf_sp: 7,
    dwarf_lr: None,
    zero_fill_dwarf_ranges: &[(17, 32)],
};

// PERF_REG_ARM: R0..R15 (13=SP, 14=LR, 15=PC), identity-mapped to DWARF.
const ARM: ArchTable = ArchTable {
    perf_to_dwarf: &[
        Some(0),
        Some(1),
        Some(2),
        Some(3),
        Some(4),
        Some(5),
        Some(6),
        Some(7),
        Some(8),
        Some(9),
        Some(10),
        Some(11),
        Some(12),
        Some(13),
        Some(14),
        Some(15),
    ],
    perf_ip_index: 15,
    perf_sp_index: 13,
    dwarf_ip: 15,
    dwarf_sp: 13,
    dwarf_lr: Some(14),
    zero_fill_dwarf_ranges: &[],
};

// PERF_REG_ARM64: X0..X30, SP=31, PC=32.
const AARCH64: ArchTable = ArchTable {
    perf_to_dwarf: &[
        Some(0),
        Some(1),
        Some(2),
        Some(3),
        Some(4),
        Some(5),
        Some(6),
        Some(7),
        Some(8),
        Some(9),
        Some(10),
        Some(11),
        Some(12),
        Some(13),
        Some(14),
        Some(15),
        Some(16),
        Some(17),
        Some(18),
        Some(19),
        Some(20),
        Some(21),
        Some(22),
        Some(23),
        Some(24),
        Some(25),
        Some(26),
        Some(27),
        Some(28),
        Some(29),
        Some(30), // x30 / LR
        Some(31), // SP
        None,     // PC handled via dwarf_ip
    ],
    perf_ip_index: 32,
    perf_sp_index: 31,
    dwarf_ip: 32,
    dwarf_sp: 31,
    dwarf_lr: Some(30),
    zero_fill_dwarf_ranges: &[],
};

// PERF_REG_X86 (32-bit): BX CX DX SI DI BP AX DS ES FS GS IP CS FLAGS SP SS.
const X86: ArchTable = ArchTable {
    perf_to_dwarf: &[
        Some(3), // BX
        Some(1), // CX
        Some(2), // DX
        Some(6), // SI
        Some(7), // DI
        Some(5), // BP
        Some(0), // AX
        None,    // DS
        None,    // ES
        None,    // FS
        None,    // GS
        None,    // IP handled via dwarf_ip
        None,    // CS
        None,    // FLAGS
        Some(4), // SP
        None,    // SS
    ],
    perf_ip_index: 11,
    perf_sp_index: 14,
    dwarf_ip: 8,
    dwarf_sp: 4,
    dwarf_lr: None,
    zero_fill_dwarf_ranges: &[],
};
