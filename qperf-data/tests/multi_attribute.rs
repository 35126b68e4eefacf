//! Exercises a file-mode perf.data recording with more than one attribute,
//! each bound to its own ids table, mirroring `perf record -e
//! cycles,instructions`. Regression coverage for `PerfFileReader::open`
//! actually reading each attribute's trailing `perf_file_section` instead
//! of leaving `ids` empty.

use byteorder::{LittleEndian, WriteBytesExt};
use qperf_data::{PerfFileReader, Record};
use std::io::{Cursor, Write};

const ATTR_SIZE: u64 = 64; // PERF_ATTR_SIZE_VER0
const SAMPLE_ID: u64 = 1 << 6;
const SAMPLE_IP: u64 = 1 << 0;
const SAMPLE_TID: u64 = 1 << 1;
const SAMPLE_TIME: u64 = 1 << 2;
const SAMPLE_PERIOD: u64 = 1 << 8;

fn write_attr(out: &mut Vec<u8>, config: u64, sample_type: u64) {
    let start = out.len();
    out.write_u32::<LittleEndian>(0).unwrap(); // type
    out.write_u32::<LittleEndian>(ATTR_SIZE as u32).unwrap();
    out.write_u64::<LittleEndian>(config).unwrap();
    out.write_u64::<LittleEndian>(1).unwrap(); // sample_period
    out.write_u64::<LittleEndian>(sample_type).unwrap();
    out.write_u64::<LittleEndian>(0).unwrap(); // read_format
    out.write_u64::<LittleEndian>(0).unwrap(); // flags
    // VER0 has no further named fields; pad out to attr_size so
    // `Attr::parse`'s trailing `io::copy` skip has bytes to consume.
    while (out.len() - start) < ATTR_SIZE as usize {
        out.write_u8(0).unwrap();
    }
    assert_eq!((out.len() - start) as u64, ATTR_SIZE);
}

fn write_sample(out: &mut Vec<u8>, pid: u32, time: u64, ip: u64, id: u64, with_period: bool) {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(ip).unwrap(); // IP
    body.write_u32::<LittleEndian>(pid).unwrap(); // TID.pid
    body.write_u32::<LittleEndian>(pid).unwrap(); // TID.tid
    body.write_u64::<LittleEndian>(time).unwrap(); // TIME
    body.write_u64::<LittleEndian>(id).unwrap(); // ID
    if with_period {
        body.write_u64::<LittleEndian>(1).unwrap(); // PERIOD
    }
    out.write_u32::<LittleEndian>(9).unwrap(); // PERF_RECORD_SAMPLE
    out.write_u16::<LittleEndian>(2).unwrap(); // misc: user
    out.write_u16::<LittleEndian>((8 + body.len()) as u16)
        .unwrap();
    out.extend_from_slice(&body);
}

/// Builds a two-attribute file-mode perf.data buffer: attribute 0 is
/// "cycles" (ids {10, 11}), attribute 1 is "instructions" (ids {20}), each
/// with its own ids `FileSection` pointing past the end of the data
/// section. Attribute 1 also samples PERIOD so the two attributes have
/// distinct `sample_type` values and the reader must fall back to peeking
/// each SAMPLE's `id` field rather than assuming a uniform layout.
fn build_two_attribute_file() -> Vec<u8> {
    let sample_type_0 = SAMPLE_IP | SAMPLE_TID | SAMPLE_TIME | SAMPLE_ID;
    let sample_type_1 = sample_type_0 | SAMPLE_PERIOD;

    let mut attr_buf = Vec::new();
    write_attr(&mut attr_buf, 0 /* cycles */, sample_type_0);
    write_attr(&mut attr_buf, 1 /* instructions */, sample_type_1);

    let mut data = Vec::new();
    write_sample(&mut data, 100, 5, 0x1000, 10, false);
    write_sample(&mut data, 100, 6, 0x2000, 20, true);
    write_sample(&mut data, 100, 7, 0x1010, 11, false);

    let file_header_size = 104u64;
    let attrs_offset = file_header_size;
    // Each attrs-table entry is the attr struct followed by its 16-byte
    // ids `FileSection` pointer, not just the raw attr bytes.
    let entry_stride = ATTR_SIZE + 16;
    let attrs_size = entry_stride * 2;
    let data_offset = attrs_offset + attrs_size;
    let data_size = data.len() as u64;

    // Each attribute's ids table sits after the data section: attribute 0
    // owns ids {10, 11}, attribute 1 owns {20}.
    let ids0_offset = data_offset + data_size;
    let ids0: [u64; 2] = [10, 11];
    let ids1_offset = ids0_offset + (ids0.len() as u64) * 8;
    let ids1: [u64; 1] = [20];

    let mut out = Vec::new();
    out.extend_from_slice(b"PERFILE2");
    out.write_u64::<LittleEndian>(file_header_size).unwrap();
    out.write_u64::<LittleEndian>(entry_stride).unwrap(); // attr_size: attr + trailing FileSection
    out.write_u64::<LittleEndian>(attrs_offset).unwrap();
    out.write_u64::<LittleEndian>(attrs_size).unwrap();
    out.write_u64::<LittleEndian>(data_offset).unwrap();
    out.write_u64::<LittleEndian>(data_size).unwrap();
    out.write_u64::<LittleEndian>(0).unwrap(); // event_types offset
    out.write_u64::<LittleEndian>(0).unwrap(); // event_types size
    for _ in 0..4 {
        out.write_u64::<LittleEndian>(0).unwrap(); // feature bits, none set
    }
    assert_eq!(out.len() as u64, attrs_offset);

    // Attribute 0 entry: attr bytes, then its ids FileSection.
    out.extend_from_slice(&attr_buf[..ATTR_SIZE as usize]);
    out.write_u64::<LittleEndian>(ids0_offset).unwrap();
    out.write_u64::<LittleEndian>((ids0.len() * 8) as u64)
        .unwrap();

    // Attribute 1 entry: attr bytes, then its ids FileSection.
    out.extend_from_slice(&attr_buf[ATTR_SIZE as usize..]);
    out.write_u64::<LittleEndian>(ids1_offset).unwrap();
    out.write_u64::<LittleEndian>((ids1.len() * 8) as u64)
        .unwrap();

    assert_eq!(out.len() as u64, data_offset);
    out.extend_from_slice(&data);
    assert_eq!(out.len() as u64, ids0_offset);
    for id in ids0 {
        out.write_u64::<LittleEndian>(id).unwrap();
    }
    assert_eq!(out.len() as u64, ids1_offset);
    for id in ids1 {
        out.write_u64::<LittleEndian>(id).unwrap();
    }

    out
}

#[test]
fn reads_ids_table_for_every_attribute() {
    let bytes = build_two_attribute_file();
    let reader = PerfFileReader::open(Cursor::new(bytes)).expect("open");
    let attrs = reader.attributes();
    assert_eq!(attrs.len(), 2);
    assert_eq!(attrs[0].ids, vec![10, 11]);
    assert_eq!(attrs[1].ids, vec![20]);
}

#[test]
fn disambiguates_samples_by_bound_id_not_attribute_zero() {
    let bytes = build_two_attribute_file();
    let mut reader = PerfFileReader::open(Cursor::new(bytes)).expect("open");

    let mut seen = Vec::new();
    while let Some(decoded) = reader.next_record().unwrap() {
        if let Record::Sample(sample) = &decoded.record {
            seen.push((decoded.attr_index, sample.id));
        }
    }

    assert_eq!(seen, vec![(Some(0), Some(10)), (Some(1), Some(20)), (Some(0), Some(11))]);
}
