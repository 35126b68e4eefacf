//! Decoder for Linux `perf.data` recordings: the fixed file header, the
//! attribute table, feature sections, and the variable-length record
//! stream, in both file (seekable) and pipe (sequential-only) mode.

mod attr;
mod error;
mod header;
mod pipe;
mod record;
mod reader;

pub use attr::{Attr, ReadFormat, SampleType};
pub use error::{Error, Result, Status};
pub use header::{Endian, Feature, FeatureSections, FileSection};
pub use pipe::PipeDecoder;
pub use record::{
    BranchEntry, CommRecord, CpuMode, ForkOrExitRecord, LostRecord, Mmap2FileId, Mmap2Record,
    MmapRecord, Record, SampleId, SampleRecord, PERF_CONTEXT_HV, PERF_CONTEXT_KERNEL,
    PERF_CONTEXT_MAX, PERF_CONTEXT_USER, PERF_RECORD_USER_TYPE_START,
};
pub use reader::{AttributeDescription, DecodedRecord, PerfFileReader};

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::{Cursor, Write};

    /// Builds a minimal single-attribute, single-sample perf.data file in
    /// memory: file header, one VER0-sized attr with no bound ids, no
    /// feature bits set, and a data section with one MMAP then one SAMPLE
    /// record.
    fn build_minimal_file() -> Vec<u8> {
        let attr_size: u64 = 64; // PERF_ATTR_SIZE_VER0
        let sample_type: u64 = 1 /*IP*/ | (1 << 1) /*TID*/ | (1 << 2) /*TIME*/;

        let mut attr_buf = Vec::new();
        attr_buf.write_u32::<LittleEndian>(0).unwrap(); // type
        attr_buf.write_u32::<LittleEndian>(attr_size as u32).unwrap(); // self size
        attr_buf.write_u64::<LittleEndian>(0).unwrap(); // config
        attr_buf.write_u64::<LittleEndian>(1).unwrap(); // sample_period
        attr_buf.write_u64::<LittleEndian>(sample_type).unwrap();
        attr_buf.write_u64::<LittleEndian>(0).unwrap(); // read_format
        attr_buf.write_u64::<LittleEndian>(0).unwrap(); // flags
        assert_eq!(attr_buf.len() as u64, attr_size);

        let mut data = Vec::new();
        // MMAP record: pid,tid,addr,len,pgoff,filename("/bin/x\0" padded)
        let filename = b"/bin/x\0\0"; // 8 bytes, nul padded
        let mmap_body_len = 4 + 4 + 8 + 8 + 8 + filename.len();
        let mmap_size = 8 + mmap_body_len;
        data.write_u32::<LittleEndian>(1).unwrap(); // PERF_RECORD_MMAP
        data.write_u16::<LittleEndian>(2).unwrap(); // misc: user
        data.write_u16::<LittleEndian>(mmap_size as u16).unwrap();
        data.write_u32::<LittleEndian>(100).unwrap(); // pid
        data.write_u32::<LittleEndian>(100).unwrap(); // tid
        data.write_u64::<LittleEndian>(0x1000).unwrap(); // addr
        data.write_u64::<LittleEndian>(0x1000).unwrap(); // len
        data.write_u64::<LittleEndian>(0).unwrap(); // pgoff
        data.write_all(filename).unwrap();

        // SAMPLE record: ip,pid/tid,time
        let sample_body_len = 8 + 4 + 4 + 8;
        let sample_size = 8 + sample_body_len;
        data.write_u32::<LittleEndian>(9).unwrap(); // PERF_RECORD_SAMPLE
        data.write_u16::<LittleEndian>(2).unwrap();
        data.write_u16::<LittleEndian>(sample_size as u16).unwrap();
        data.write_u64::<LittleEndian>(0x1010).unwrap(); // ip
        data.write_u32::<LittleEndian>(100).unwrap(); // pid
        data.write_u32::<LittleEndian>(100).unwrap(); // tid
        data.write_u64::<LittleEndian>(5).unwrap(); // time

        let attrs_offset = 104u64;
        let data_offset = attrs_offset + attr_buf.len() as u64;

        let mut out = Vec::new();
        out.extend_from_slice(header::MAGIC_LE);
        out.write_u64::<LittleEndian>(104).unwrap(); // header size
        out.write_u64::<LittleEndian>(attr_size).unwrap();
        out.write_u64::<LittleEndian>(attrs_offset).unwrap();
        out.write_u64::<LittleEndian>(attr_buf.len() as u64).unwrap();
        out.write_u64::<LittleEndian>(data_offset).unwrap();
        out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap(); // event_types offset
        out.write_u64::<LittleEndian>(0).unwrap(); // event_types size
        for _ in 0..4 {
            out.write_u64::<LittleEndian>(0).unwrap(); // feature bits, none set
        }
        assert_eq!(out.len() as u64, attrs_offset);
        out.extend_from_slice(&attr_buf);
        assert_eq!(out.len() as u64, data_offset);
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn decodes_file_mode_magic_and_records() {
        let bytes = build_minimal_file();
        let cursor = Cursor::new(bytes);
        let mut reader = PerfFileReader::open(cursor).expect("open");
        assert_eq!(reader.attributes().len(), 1);

        let first = reader.next_record().unwrap().expect("mmap");
        match first.record {
            Record::Mmap(m) => {
                assert_eq!(m.pid, 100);
                assert_eq!(m.addr, 0x1000);
                assert_eq!(m.filename, "/bin/x");
            }
            other => panic!("expected Mmap, got {other:?}"),
        }

        let second = reader.next_record().unwrap().expect("sample");
        match second.record {
            Record::Sample(s) => {
                assert_eq!(s.ip, Some(0x1010));
                assert_eq!(s.time, Some(5));
            }
            other => panic!("expected Sample, got {other:?}"),
        }

        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn rejects_unrecognized_magic() {
        let mut bytes = build_minimal_file();
        bytes[0] = b'X';
        let cursor = Cursor::new(bytes);
        let err = PerfFileReader::open(cursor).unwrap_err();
        assert!(matches!(err, Error::BadMagic));
    }

    #[test]
    fn pipe_decoder_yields_needs_more_at_record_boundary() {
        let mut dec = PipeDecoder::new(Endian::Little);
        let mut attr_buf = Vec::new();
        attr_buf.write_u32::<LittleEndian>(0).unwrap();
        attr_buf.write_u32::<LittleEndian>(64).unwrap();
        attr_buf.write_u64::<LittleEndian>(0).unwrap();
        attr_buf.write_u64::<LittleEndian>(1).unwrap();
        attr_buf.write_u64::<LittleEndian>(1 | (1 << 2)).unwrap(); // IP|TIME
        attr_buf.write_u64::<LittleEndian>(0).unwrap();
        attr_buf.write_u64::<LittleEndian>(0).unwrap();

        let mut rec = Vec::new();
        rec.write_u32::<LittleEndian>(64).unwrap(); // HEADER_ATTR
        rec.write_u16::<LittleEndian>(0).unwrap();
        rec.write_u16::<LittleEndian>((8 + attr_buf.len()) as u16).unwrap();
        rec.extend_from_slice(&attr_buf);

        // Feed everything but the last byte: expect NeedMore.
        dec.feed(&rec[..rec.len() - 1]);
        assert!(matches!(dec.poll().unwrap(), Status::NeedMore));
        dec.feed(&rec[rec.len() - 1..]);
        match dec.poll().unwrap() {
            Status::Ok(decoded) => {
                assert!(matches!(decoded.record, Record::AttrDefinition(_, _)));
            }
            Status::NeedMore => panic!("expected a decoded record"),
        }
    }
}
