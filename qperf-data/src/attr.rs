use byteorder::{ByteOrder, ReadBytesExt};
use std::io::{self, Read};

use crate::error::Result;

pub const PERF_ATTR_SIZE_VER0: u64 = 64;
pub const PERF_ATTR_SIZE_VER1: u64 = 72;
pub const PERF_ATTR_SIZE_VER2: u64 = 80;
pub const PERF_ATTR_SIZE_VER3: u64 = 96;
pub const PERF_ATTR_SIZE_VER4: u64 = 104;
pub const PERF_ATTR_SIZE_VER5: u64 = 112;
pub const PERF_ATTR_SIZE_VER6: u64 = 120;
pub const PERF_ATTR_SIZE_VER7: u64 = 128;

/// Bit position of `sample_id_all` in `perf_event_attr`'s flag bitfield.
const SAMPLE_ID_ALL_BIT: u64 = 18;

bitflags::bitflags! {
    /// Mirrors the kernel's `PERF_SAMPLE_*` bitmask, restricted to the
    /// members the core dispatches on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleType: u64 {
        const IP = 1 << 0;
        const TID = 1 << 1;
        const TIME = 1 << 2;
        const ADDR = 1 << 3;
        const READ = 1 << 4;
        const CALLCHAIN = 1 << 5;
        const ID = 1 << 6;
        const CPU = 1 << 7;
        const PERIOD = 1 << 8;
        const STREAM_ID = 1 << 9;
        const RAW = 1 << 10;
        const BRANCH_STACK = 1 << 11;
        const REGS_USER = 1 << 12;
        const STACK_USER = 1 << 13;
        const WEIGHT = 1 << 14;
        const DATA_SRC = 1 << 15;
        const IDENTIFIER = 1 << 16;
        const TRANSACTION = 1 << 17;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadFormat: u64 {
        const TOTAL_TIME_ENABLED = 1 << 0;
        const TOTAL_TIME_RUNNING = 1 << 1;
        const ID = 1 << 2;
        const GROUP = 1 << 3;
    }
}

/// Describes one counter. Narrower than the kernel's `perf_event_attr`:
/// only the fields the core consumes are kept, everything else in the
/// versioned struct is read and discarded.
#[derive(Debug, Clone)]
pub struct Attr {
    pub attr_type: u32,
    pub config: u64,
    pub sample_type: SampleType,
    pub read_format: ReadFormat,
    pub sample_id_all: bool,
    pub sample_regs_user: u64,
    pub name: Option<String>,
    /// The struct's own self-reported size, in bytes. Used by callers to
    /// compute where trailing data (an ids array in a pipe-mode
    /// `PERF_RECORD_HEADER_ATTR` record) begins.
    pub self_size: u64,
}

impl Attr {
    /// Parses a versioned `perf_event_attr`. The struct's own self-reported
    /// `size` field (its second word) is authoritative for how many of the
    /// versioned trailing fields are present; callers stepping through the
    /// file header's attribute array use the file header's `attr_size` only
    /// to compute the stride between array entries, not to interpret this
    /// struct's contents.
    pub(crate) fn parse<R: Read, T: ByteOrder>(r: &mut R) -> Result<Self> {
        let mut consumed: u64 = 0;
        macro_rules! field {
            ($read:ident, $width:expr) => {{
                let v = r.$read::<T>()?;
                consumed += $width;
                v
            }};
        }

        let attr_type = field!(read_u32, 4);
        let attr_size = field!(read_u32, 4) as u64;
        let config = field!(read_u64, 8);
        let _sample_period_or_freq = field!(read_u64, 8);
        let sample_type_raw = field!(read_u64, 8);
        let read_format_raw = field!(read_u64, 8);
        let flags = field!(read_u64, 8);
        let sample_id_all = (flags >> SAMPLE_ID_ALL_BIT) & 1 != 0;

        let mut sample_regs_user = 0u64;

        if attr_size >= PERF_ATTR_SIZE_VER1 {
            let _wakeup = field!(read_u32, 4);
            let _bp_type = field!(read_u32, 4);
            let _config1 = field!(read_u64, 8);
            let _config2 = field!(read_u64, 8);
        }
        if attr_size >= PERF_ATTR_SIZE_VER2 {
            let _branch_sample_type = field!(read_u64, 8);
        }
        if attr_size >= PERF_ATTR_SIZE_VER3 {
            sample_regs_user = field!(read_u64, 8);
            let _sample_stack_user = field!(read_u32, 4);
            let _clockid = field!(read_i32, 4);
        }
        if attr_size >= PERF_ATTR_SIZE_VER4 {
            let _sample_regs_intr = field!(read_u64, 8);
        }
        if attr_size >= PERF_ATTR_SIZE_VER5 {
            let _aux_watermark = field!(read_u32, 4);
            let _sample_max_stack = field!(read_u16, 2);
            let _reserved_2 = field!(read_u16, 2);
        }
        if attr_size >= PERF_ATTR_SIZE_VER6 {
            let _aux_sample_size = field!(read_u32, 4);
            let _reserved_3 = field!(read_u32, 4);
        }
        if attr_size >= PERF_ATTR_SIZE_VER7 {
            let _sig_data = field!(read_u64, 8);
        }

        if consumed < attr_size {
            io::copy(&mut r.take(attr_size - consumed), &mut io::sink())?;
        }

        Ok(Attr {
            attr_type,
            config,
            sample_type: SampleType::from_bits_truncate(sample_type_raw),
            read_format: ReadFormat::from_bits_truncate(read_format_raw),
            sample_id_all,
            sample_regs_user,
            name: None,
            self_size: attr_size,
        })
    }
}
