//! Drives a `StreamWriter` through a small but complete session (header,
//! one attribute, one interned location, a resolved symbol, a sample,
//! then thread teardown) and re-parses the raw frame stream byte for
//! byte, the way a consumer on the other end of the pipe would.

use byteorder::{LittleEndian, ReadBytesExt};
use qperf_proto::{AttributeKey, LocationKey, MessageTag, StreamWriter, MAGIC, WIRE_VERSION};
use std::io::Cursor;

struct Frame {
    tag: u8,
    payload: Vec<u8>,
}

/// Parses every `(u32 length, u8 tag, payload)` frame after the 16-byte
/// header, returning them in stream order.
fn parse_frames(bytes: &[u8]) -> Vec<Frame> {
    assert_eq!(&bytes[0..12], MAGIC);
    let mut cursor = Cursor::new(&bytes[12..16]);
    assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), WIRE_VERSION);

    let mut frames = Vec::new();
    let mut offset = 16usize;
    while offset < bytes.len() {
        let length = (&bytes[offset..offset + 4])
            .read_u32::<LittleEndian>()
            .unwrap() as usize;
        let tag = bytes[offset + 4];
        let payload = bytes[offset + 5..offset + 4 + length].to_vec();
        frames.push(Frame { tag, payload });
        offset += 4 + length;
    }
    frames
}

#[test]
fn full_session_round_trips_through_the_frame_stream() {
    let mut writer = StreamWriter::new(Vec::new());
    writer.write_header().unwrap();

    let name_id = writer.intern_string(b"cycles").unwrap();
    let attr_id = writer
        .intern_attribute(
            AttributeKey {
                attr_type: 0,
                config: 0,
            },
            Some(name_id),
        )
        .unwrap();

    let func_name_id = writer.intern_string(b"main").unwrap();
    let location_id = writer
        .intern_location(LocationKey {
            address: 0x401000,
            file_string_id: None,
            pid: 100,
            line: -1,
            column: -1,
            parent_location_id: None,
        })
        .unwrap();
    writer
        .emit_symbol(location_id, Some(func_name_id), None, false)
        .unwrap();

    writer.emit_thread_start(100, 100, 0).unwrap();
    writer
        .emit_sample(100, 100, 5, &[location_id], 0, attr_id, 1000, 1)
        .unwrap();
    writer.emit_thread_end(100, 100, 20).unwrap();

    let bytes = writer.into_inner();
    let frames = parse_frames(&bytes);

    let tags: Vec<u8> = frames.iter().map(|f| f.tag).collect();
    assert_eq!(
        tags,
        vec![
            MessageTag::StringDefinition as u8,   // "cycles"
            MessageTag::AttributesDefinition as u8,
            MessageTag::StringDefinition as u8,   // "main"
            MessageTag::LocationDefinition as u8,
            MessageTag::SymbolDefinition as u8,
            MessageTag::ThreadStart as u8,
            MessageTag::Sample as u8,
            MessageTag::ThreadEnd as u8,
        ]
    );

    // The sample frame carries the interned ids, not raw strings.
    let sample = &frames[6];
    let mut cursor = Cursor::new(&sample.payload);
    let pid = cursor.read_i32::<LittleEndian>().unwrap();
    let tid = cursor.read_i32::<LittleEndian>().unwrap();
    let time = cursor.read_u64::<LittleEndian>().unwrap();
    let frame_count = cursor.read_u32::<LittleEndian>().unwrap();
    let mut frame_ids = Vec::new();
    for _ in 0..frame_count {
        frame_ids.push(cursor.read_u32::<LittleEndian>().unwrap());
    }
    let num_guessed = cursor.read_u32::<LittleEndian>().unwrap();
    let sample_attr_id = cursor.read_u32::<LittleEndian>().unwrap();
    let period = cursor.read_u64::<LittleEndian>().unwrap();
    let weight = cursor.read_u64::<LittleEndian>().unwrap();

    assert_eq!((pid, tid, time), (100, 100, 5));
    assert_eq!(frame_ids, vec![location_id]);
    assert_eq!(num_guessed, 0);
    assert_eq!(sample_attr_id, attr_id);
    assert_eq!((period, weight), (1000, 1));
}

#[test]
fn reinterning_the_same_string_and_location_emits_no_extra_definitions() {
    let mut writer = StreamWriter::new(Vec::new());
    writer.write_header().unwrap();

    let key = LocationKey {
        address: 0x1000,
        file_string_id: None,
        pid: 1,
        line: -1,
        column: -1,
        parent_location_id: None,
    };
    let first = writer.intern_location(key).unwrap();
    let second = writer.intern_location(key).unwrap();
    assert_eq!(first, second);

    let s1 = writer.intern_string(b"libc.so").unwrap();
    let s2 = writer.intern_string(b"libc.so").unwrap();
    assert_eq!(s1, s2);

    let bytes = writer.into_inner();
    let frames = parse_frames(&bytes);
    assert_eq!(frames.len(), 2, "one LocationDefinition, one StringDefinition");
}
