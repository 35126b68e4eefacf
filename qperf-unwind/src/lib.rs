//! Remote DWARF stack unwinder: walks CFI rows over a captured register
//! set, a user-stack snapshot and the sampled PID's ELF/DWARF state,
//! falling back to (and supplementing with) the kernel-supplied
//! call-chain.

mod arch;
mod callchain;
mod cfi_row;
mod error;
mod memory;
mod registers;
mod unwinder;

pub use arch::{ArchTable, Architecture};
pub use callchain::{decode as decode_callchain, ChainDomain, ChainEntry};
pub use cfi_row::{SimpleRule, UnwindRow};
pub use error::{Error, Result};
pub use memory::MemoryReader;
pub use registers::RegisterFile;
pub use unwinder::{DwarfUnwinder, Frame};
