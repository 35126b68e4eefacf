use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Read;

use crate::error::{Error, Result};

pub const MAGIC_LE: &[u8; 8] = b"PERFILE2";
pub const MAGIC_BE: &[u8; 8] = b"2ELIFREP";

/// `offset`/`size` pair pointing into the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSection {
    pub offset: u64,
    pub size: u64,
}

impl FileSection {
    pub(crate) fn parse<R: Read, T: ByteOrder>(r: &mut R) -> Result<Self> {
        Ok(FileSection {
            offset: r.read_u64::<T>()?,
            size: r.read_u64::<T>()?,
        })
    }
}

/// Which of the two recognized perf.data endiannesses a stream declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// 256-bit feature bitmap from the file header, plus the per-feature
/// section table read right after the data section.
#[derive(Debug, Clone, Default)]
pub struct FeatureSections {
    pub bits: [u64; 4],
    pub sections: Vec<(Feature, FileSection)>,
}

impl FeatureSections {
    pub fn is_set(&self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        let shift = bit % 64;
        word < self.bits.len() && (self.bits[word] >> shift) & 1 != 0
    }

    pub fn section(&self, feature: Feature) -> Option<FileSection> {
        self.sections
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, s)| *s)
    }
}

/// Feature bits the core cares about. Bit numbers match
/// `tools/perf/Documentation/perf.data-file-format.txt`; bits not listed
/// here are tracked only by position (see `FeatureSections::is_set`) and
/// are skipped when reading the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    TracingData,
    BuildId,
    Hostname,
    OsRelease,
    Version,
    Arch,
    NrCpus,
    CpuDesc,
    CpuId,
    TotalMem,
    CmdLine,
    EventDesc,
    CpuTopology,
    NumaTopology,
    Other(u32),
}

impl Feature {
    fn from_bit(bit: u32) -> Self {
        match bit {
            1 => Feature::TracingData,
            2 => Feature::BuildId,
            3 => Feature::Hostname,
            4 => Feature::OsRelease,
            5 => Feature::Version,
            6 => Feature::Arch,
            7 => Feature::NrCpus,
            8 => Feature::CpuDesc,
            9 => Feature::CpuId,
            10 => Feature::TotalMem,
            11 => Feature::CmdLine,
            12 => Feature::EventDesc,
            13 => Feature::CpuTopology,
            14 => Feature::NumaTopology,
            other => Feature::Other(other),
        }
    }
}

pub const FILE_HEADER_SIZE: u64 = 104;
pub const PIPE_HEADER_SIZE: u64 = 16;

/// The two header shapes a perf.data stream can present.
pub enum Header {
    File(FileHeader),
    Pipe,
}

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub attr_size: u64,
    pub attrs: FileSection,
    pub data: FileSection,
    pub event_types: FileSection,
    pub feature_bits: [u64; 4],
}

/// Reads the 8-byte magic and dispatches to the file or pipe header shape.
/// `r` must be positioned at the very start of the stream.
pub fn parse_header<R: Read>(r: &mut R) -> Result<(Endian, Header)> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).map_err(|_| Error::HeaderError)?;

    let endian = if &magic == MAGIC_LE {
        Endian::Little
    } else if &magic == MAGIC_BE {
        Endian::Big
    } else {
        return Err(Error::BadMagic);
    };

    let header = match endian {
        Endian::Little => parse_header_body::<R, LittleEndian>(r)?,
        Endian::Big => parse_header_body::<R, BigEndian>(r)?,
    };
    Ok((endian, header))
}

fn parse_header_body<R: Read, T: ByteOrder>(r: &mut R) -> Result<Header> {
    let size = r.read_u64::<T>()?;
    if size == PIPE_HEADER_SIZE {
        return Ok(Header::Pipe);
    }
    if size != FILE_HEADER_SIZE {
        return Err(Error::HeaderError);
    }
    let attr_size = r.read_u64::<T>()?;
    let attrs = FileSection::parse::<R, T>(r)?;
    let data = FileSection::parse::<R, T>(r)?;
    let event_types = FileSection::parse::<R, T>(r)?;
    let mut feature_bits = [0u64; 4];
    for word in feature_bits.iter_mut() {
        *word = r.read_u64::<T>()?;
    }
    Ok(Header::File(FileHeader {
        attr_size,
        attrs,
        data,
        event_types,
        feature_bits,
    }))
}

/// Reads the `(offset, size)` section-table entries that follow the data
/// section, one per set bit in `bits`, in ascending bit order.
pub fn parse_feature_sections<R: Read, T: ByteOrder>(
    r: &mut R,
    bits: [u64; 4],
) -> Result<FeatureSections> {
    let mut sections = Vec::new();
    for bit in 0..256u32 {
        let word = (bit / 64) as usize;
        let shift = bit % 64;
        if (bits[word] >> shift) & 1 != 0 {
            let section = FileSection::parse::<R, T>(r)?;
            sections.push((Feature::from_bit(bit), section));
        }
    }
    Ok(FeatureSections { bits, sections })
}
