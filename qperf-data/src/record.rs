use byteorder::{ByteOrder, ReadBytesExt};
use std::io::Read;

use crate::attr::{Attr, ReadFormat, SampleType};
use crate::error::{Error, Result};

pub const PERF_RECORD_MMAP: u32 = 1;
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_COMM: u32 = 3;
pub const PERF_RECORD_EXIT: u32 = 4;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_FORK: u32 = 7;
pub const PERF_RECORD_READ: u32 = 8;
pub const PERF_RECORD_SAMPLE: u32 = 9;
pub const PERF_RECORD_MMAP2: u32 = 10;
pub const PERF_RECORD_FINISHED_ROUND: u32 = 68;
pub const PERF_RECORD_USER_TYPE_START: u32 = 64;

pub const PERF_RECORD_MISC_CPUMODE_MASK: u16 = 7;
pub const PERF_RECORD_MISC_CPUMODE_UNKNOWN: u16 = 0;
pub const PERF_RECORD_MISC_KERNEL: u16 = 1;
pub const PERF_RECORD_MISC_USER: u16 = 2;
pub const PERF_RECORD_MISC_HYPERVISOR: u16 = 3;
pub const PERF_RECORD_MISC_MMAP_DATA: u16 = 1 << 13;
pub const PERF_RECORD_MISC_COMM_EXEC: u16 = 1 << 13;
pub const PERF_RECORD_MISC_MMAP_BUILD_ID: u16 = 1 << 14;

/// Synthetic call-chain sentinels; values above `PERF_CONTEXT_MAX` toggle
/// the active symbol table while walking a decoded call chain.
pub const PERF_CONTEXT_HV: u64 = 0xffff_ffff_ffff_ffe0;
pub const PERF_CONTEXT_KERNEL: u64 = 0xffff_ffff_ffff_ff80;
pub const PERF_CONTEXT_USER: u64 = 0xffff_ffff_ffff_ff81;
pub const PERF_CONTEXT_MAX: u64 = 0xffff_ffff_ffff_ff00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Unknown,
    Kernel,
    User,
    Hypervisor,
}

impl CpuMode {
    pub fn from_misc(misc: u16) -> Self {
        match misc & PERF_RECORD_MISC_CPUMODE_MASK {
            PERF_RECORD_MISC_KERNEL => CpuMode::Kernel,
            PERF_RECORD_MISC_USER => CpuMode::User,
            PERF_RECORD_MISC_HYPERVISOR => CpuMode::Hypervisor,
            _ => CpuMode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub record_type: u32,
    pub misc: u16,
    pub size: u16,
}

impl RecordHeader {
    pub const SIZE: usize = 8;

    pub fn parse<R: Read, T: ByteOrder>(r: &mut R) -> Result<Self> {
        let record_type = r.read_u32::<T>()?;
        let misc = r.read_u16::<T>()?;
        let size = r.read_u16::<T>()?;
        if (size as usize) < Self::SIZE {
            return Err(Error::RecordTooSmall { size: size as u32 });
        }
        Ok(RecordHeader {
            record_type,
            misc,
            size,
        })
    }
}

/// Trailing `sample_id` fields appended to non-SAMPLE records when the
/// governing attribute has `sample_id_all` set. Order is fixed by the
/// kernel ABI: TID, TIME, ID, STREAM_ID, CPU, IDENTIFIER.
#[derive(Debug, Clone, Default)]
pub struct SampleId {
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub time: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
}

impl SampleId {
    fn parse<R: Read, T: ByteOrder>(r: &mut R, sample_type: SampleType) -> Result<Self> {
        let mut s = SampleId::default();
        if sample_type.contains(SampleType::TID) {
            s.pid = Some(r.read_u32::<T>()?);
            s.tid = Some(r.read_u32::<T>()?);
        }
        if sample_type.contains(SampleType::TIME) {
            s.time = Some(r.read_u64::<T>()?);
        }
        if sample_type.contains(SampleType::ID) {
            s.id = Some(r.read_u64::<T>()?);
        }
        if sample_type.contains(SampleType::STREAM_ID) {
            s.stream_id = Some(r.read_u64::<T>()?);
        }
        if sample_type.contains(SampleType::CPU) {
            s.cpu = Some(r.read_u32::<T>()?);
            let _reserved = r.read_u32::<T>()?;
        }
        if sample_type.contains(SampleType::IDENTIFIER) {
            s.id = Some(r.read_u64::<T>()?);
        }
        Ok(s)
    }
}

#[derive(Debug, Clone)]
pub struct MmapRecord {
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub filename: String,
    pub is_executable: bool,
    pub cpu_mode: CpuMode,
    pub sample_id: SampleId,
}

#[derive(Debug, Clone)]
pub enum Mmap2FileId {
    InodeAndVersion {
        major: u32,
        minor: u32,
        inode: u64,
        inode_generation: u64,
    },
    BuildId(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Mmap2Record {
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub file_id: Mmap2FileId,
    pub protection: u32,
    pub flags: u32,
    pub filename: String,
    pub is_executable: bool,
    pub cpu_mode: CpuMode,
    pub sample_id: SampleId,
}

#[derive(Debug, Clone)]
pub struct CommRecord {
    pub pid: u32,
    pub tid: u32,
    pub name: String,
    pub is_execve: bool,
    pub sample_id: SampleId,
}

#[derive(Debug, Clone)]
pub struct ForkOrExitRecord {
    pub pid: u32,
    pub ppid: u32,
    pub tid: u32,
    pub ptid: u32,
    pub time: u64,
    pub sample_id: SampleId,
}

#[derive(Debug, Clone)]
pub struct LostRecord {
    pub id: u64,
    pub count: u64,
    pub sample_id: SampleId,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadValue {
    pub value: u64,
    pub time_enabled: Option<u64>,
    pub time_running: Option<u64>,
    pub id: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct BranchEntry {
    pub from: u64,
    pub to: u64,
    pub flags: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SampleRecord {
    pub identifier: Option<u64>,
    pub ip: Option<u64>,
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub time: Option<u64>,
    pub addr: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
    pub period: Option<u64>,
    pub read_values: Vec<ReadValue>,
    pub callchain: Vec<u64>,
    pub raw: Vec<u8>,
    pub branch_stack: Vec<BranchEntry>,
    pub user_regs_abi: Option<u64>,
    pub user_regs: Vec<u64>,
    pub user_stack: Vec<u8>,
    pub user_stack_dyn_size: Option<u64>,
    pub weight: Option<u64>,
    pub data_src: Option<u64>,
    pub transaction: Option<u64>,
    pub cpu_mode: CpuMode,
}

#[derive(Debug, Clone)]
pub enum Record {
    Mmap(MmapRecord),
    Mmap2(Mmap2Record),
    Comm(CommRecord),
    Fork(ForkOrExitRecord),
    Exit(ForkOrExitRecord),
    Lost(LostRecord),
    Sample(Box<SampleRecord>),
    FinishedRound,
    /// Pipe-mode-only pseudo record carrying an attribute definition plus
    /// the ids bound to it; there is no equivalent file-mode variant
    /// because file mode reads the whole attribute table up front.
    AttrDefinition(Attr, Vec<u64>),
    Unknown { record_type: u32 },
}

pub const PERF_RECORD_HEADER_ATTR: u32 = 64;

/// Reads a nul-terminated, then zero-padded-to-8-byte-boundary filename
/// field of known total width `field_len`.
fn read_padded_cstr<R: Read>(r: &mut R, field_len: usize) -> Result<String> {
    let mut buf = vec![0u8; field_len];
    r.read_exact(&mut buf)?;
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..nul]).into_owned())
}

fn parse_read_values<R: Read, T: ByteOrder>(
    r: &mut R,
    read_format: ReadFormat,
) -> Result<Vec<ReadValue>> {
    let has_id = read_format.contains(ReadFormat::ID);
    let has_enabled = read_format.contains(ReadFormat::TOTAL_TIME_ENABLED);
    let has_running = read_format.contains(ReadFormat::TOTAL_TIME_RUNNING);

    if read_format.contains(ReadFormat::GROUP) {
        let nr = r.read_u64::<T>()?;
        let time_enabled = if has_enabled {
            Some(r.read_u64::<T>()?)
        } else {
            None
        };
        let time_running = if has_running {
            Some(r.read_u64::<T>()?)
        } else {
            None
        };
        let mut values = Vec::with_capacity(nr as usize);
        for _ in 0..nr {
            let value = r.read_u64::<T>()?;
            let id = if has_id {
                Some(r.read_u64::<T>()?)
            } else {
                None
            };
            values.push(ReadValue {
                value,
                time_enabled,
                time_running,
                id,
            });
        }
        Ok(values)
    } else {
        let value = r.read_u64::<T>()?;
        let time_enabled = if has_enabled {
            Some(r.read_u64::<T>()?)
        } else {
            None
        };
        let time_running = if has_running {
            Some(r.read_u64::<T>()?)
        } else {
            None
        };
        let id = if has_id {
            Some(r.read_u64::<T>()?)
        } else {
            None
        };
        Ok(vec![ReadValue {
            value,
            time_enabled,
            time_running,
            id,
        }])
    }
}

/// Parses the body of a single record given its header, the attribute
/// that governs it (for SAMPLE records and for trailing `sample_id`
/// fields on everything else), and the endianness. `body_len` is
/// `header.size - 8` and bounds how many bytes may be consumed.
pub fn parse_record_body<R: Read, T: ByteOrder>(
    r: &mut R,
    header: RecordHeader,
    attr: Option<&Attr>,
) -> Result<Record> {
    let cpu_mode = CpuMode::from_misc(header.misc);
    match header.record_type {
        PERF_RECORD_MMAP => {
            let pid = r.read_u32::<T>()?;
            let tid = r.read_u32::<T>()?;
            let addr = r.read_u64::<T>()?;
            let len = r.read_u64::<T>()?;
            let pgoff = r.read_u64::<T>()?;
            let consumed_before_name = 4 + 4 + 8 + 8 + 8;
            let name_len = header.size as usize - RecordHeader::SIZE - consumed_before_name;
            let filename = read_padded_cstr(r, name_len)?;
            let sample_id = parse_trailer::<R, T>(r, attr)?;
            Ok(Record::Mmap(MmapRecord {
                pid,
                tid,
                addr,
                len,
                pgoff,
                filename,
                is_executable: header.misc & PERF_RECORD_MISC_MMAP_DATA == 0,
                cpu_mode,
                sample_id,
            }))
        }
        PERF_RECORD_MMAP2 => {
            let pid = r.read_u32::<T>()?;
            let tid = r.read_u32::<T>()?;
            let addr = r.read_u64::<T>()?;
            let len = r.read_u64::<T>()?;
            let pgoff = r.read_u64::<T>()?;
            let mut consumed_before_name = 4 + 4 + 8 + 8 + 8;
            let file_id = if header.misc & PERF_RECORD_MISC_MMAP_BUILD_ID != 0 {
                let build_id_len = r.read_u8()?;
                let _reserved = {
                    let mut b = [0u8; 3];
                    r.read_exact(&mut b)?;
                    b
                };
                let mut build_id_buf = [0u8; 20];
                r.read_exact(&mut build_id_buf)?;
                consumed_before_name += 1 + 3 + 20;
                Mmap2FileId::BuildId(build_id_buf[..build_id_len.min(20) as usize].to_vec())
            } else {
                let major = r.read_u32::<T>()?;
                let minor = r.read_u32::<T>()?;
                let inode = r.read_u64::<T>()?;
                let inode_generation = r.read_u64::<T>()?;
                consumed_before_name += 4 + 4 + 8 + 8;
                Mmap2FileId::InodeAndVersion {
                    major,
                    minor,
                    inode,
                    inode_generation,
                }
            };
            let protection = r.read_u32::<T>()?;
            let flags = r.read_u32::<T>()?;
            consumed_before_name += 4 + 4;
            let name_len = header.size as usize - RecordHeader::SIZE - consumed_before_name;
            let filename = read_padded_cstr(r, name_len)?;
            let sample_id = parse_trailer::<R, T>(r, attr)?;
            Ok(Record::Mmap2(Mmap2Record {
                pid,
                tid,
                addr,
                len,
                pgoff,
                file_id,
                protection,
                flags,
                filename,
                is_executable: header.misc & PERF_RECORD_MISC_MMAP_DATA == 0,
                cpu_mode,
                sample_id,
            }))
        }
        PERF_RECORD_COMM => {
            let pid = r.read_u32::<T>()?;
            let tid = r.read_u32::<T>()?;
            let name_len = header.size as usize - RecordHeader::SIZE - 8;
            let name = read_padded_cstr(r, name_len)?;
            let sample_id = parse_trailer::<R, T>(r, attr)?;
            Ok(Record::Comm(CommRecord {
                pid,
                tid,
                name,
                is_execve: header.misc & PERF_RECORD_MISC_COMM_EXEC != 0,
                sample_id,
            }))
        }
        PERF_RECORD_FORK | PERF_RECORD_EXIT => {
            let pid = r.read_u32::<T>()?;
            let ppid = r.read_u32::<T>()?;
            let tid = r.read_u32::<T>()?;
            let ptid = r.read_u32::<T>()?;
            let time = r.read_u64::<T>()?;
            let sample_id = parse_trailer::<R, T>(r, attr)?;
            let rec = ForkOrExitRecord {
                pid,
                ppid,
                tid,
                ptid,
                time,
                sample_id,
            };
            Ok(if header.record_type == PERF_RECORD_FORK {
                Record::Fork(rec)
            } else {
                Record::Exit(rec)
            })
        }
        PERF_RECORD_LOST => {
            let id = r.read_u64::<T>()?;
            let count = r.read_u64::<T>()?;
            let sample_id = parse_trailer::<R, T>(r, attr)?;
            Ok(Record::Lost(LostRecord {
                id,
                count,
                sample_id,
            }))
        }
        PERF_RECORD_SAMPLE => {
            let attr = attr.ok_or(Error::SignalError)?;
            let mut sample = parse_sample::<R, T>(r, attr)?;
            sample.cpu_mode = cpu_mode;
            Ok(Record::Sample(Box::new(sample)))
        }
        PERF_RECORD_FINISHED_ROUND => Ok(Record::FinishedRound),
        PERF_RECORD_HEADER_ATTR => {
            let attr = Attr::parse::<R, T>(r)?;
            let consumed = attr.self_size as usize;
            let remaining = header.size as usize - RecordHeader::SIZE - consumed;
            let n_ids = remaining / 8;
            let mut ids = Vec::with_capacity(n_ids);
            for _ in 0..n_ids {
                ids.push(r.read_u64::<T>()?);
            }
            Ok(Record::AttrDefinition(attr, ids))
        }
        other => {
            let body_len = header.size as usize - RecordHeader::SIZE;
            std::io::copy(&mut r.take(body_len as u64), &mut std::io::sink())?;
            Ok(Record::Unknown { record_type: other })
        }
    }
}

fn parse_trailer<R: Read, T: ByteOrder>(r: &mut R, attr: Option<&Attr>) -> Result<SampleId> {
    match attr {
        Some(attr) if attr.sample_id_all => SampleId::parse::<R, T>(r, attr.sample_type),
        _ => Ok(SampleId::default()),
    }
}

fn parse_sample<R: Read, T: ByteOrder>(r: &mut R, attr: &Attr) -> Result<SampleRecord> {
    let st = attr.sample_type;
    let mut s = SampleRecord::default();

    if st.contains(SampleType::IDENTIFIER) {
        s.identifier = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::IP) {
        s.ip = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::TID) {
        s.pid = Some(r.read_u32::<T>()?);
        s.tid = Some(r.read_u32::<T>()?);
    }
    if st.contains(SampleType::TIME) {
        s.time = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::ADDR) {
        s.addr = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::ID) {
        s.id = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::STREAM_ID) {
        s.stream_id = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::CPU) {
        s.cpu = Some(r.read_u32::<T>()?);
        let _reserved = r.read_u32::<T>()?;
    }
    if st.contains(SampleType::PERIOD) {
        s.period = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::READ) {
        s.read_values = parse_read_values::<R, T>(r, attr.read_format)?;
    }
    if st.contains(SampleType::CALLCHAIN) {
        let nr = r.read_u64::<T>()?;
        let mut chain = Vec::with_capacity(nr as usize);
        for _ in 0..nr {
            chain.push(r.read_u64::<T>()?);
        }
        s.callchain = chain;
    }
    if st.contains(SampleType::RAW) {
        let size = r.read_u32::<T>()?;
        let mut buf = vec![0u8; size as usize];
        r.read_exact(&mut buf)?;
        s.raw = buf;
    }
    if st.contains(SampleType::BRANCH_STACK) {
        let bnr = r.read_u64::<T>()?;
        let mut entries = Vec::with_capacity(bnr as usize);
        for _ in 0..bnr {
            let from = r.read_u64::<T>()?;
            let to = r.read_u64::<T>()?;
            let flags = r.read_u64::<T>()?;
            entries.push(BranchEntry { from, to, flags });
        }
        s.branch_stack = entries;
    }
    if st.contains(SampleType::REGS_USER) {
        let abi = r.read_u64::<T>()?;
        s.user_regs_abi = Some(abi);
        if abi != 0 {
            let n = attr.sample_regs_user.count_ones();
            let mut regs = Vec::with_capacity(n as usize);
            for _ in 0..n {
                regs.push(r.read_u64::<T>()?);
            }
            s.user_regs = regs;
        }
    }
    if st.contains(SampleType::STACK_USER) {
        let size = r.read_u64::<T>()?;
        let mut buf = vec![0u8; size as usize];
        r.read_exact(&mut buf)?;
        s.user_stack = buf;
        if size != 0 {
            s.user_stack_dyn_size = Some(r.read_u64::<T>()?);
        }
    }
    if st.contains(SampleType::WEIGHT) {
        s.weight = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::DATA_SRC) {
        s.data_src = Some(r.read_u64::<T>()?);
    }
    if st.contains(SampleType::TRANSACTION) {
        s.transaction = Some(r.read_u64::<T>()?);
    }

    Ok(s)
}
