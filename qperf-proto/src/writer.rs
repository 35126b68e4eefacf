//! Frames every emitted artifact as `(u32 length, u8 tag, payload)`,
//! interning strings/locations/attributes to dense ids and emitting a
//! definition frame the first time each is seen. Numeric payload fields
//! are little-endian; strings are `(u32 length, bytes)`; lists are
//! `(u32 count, items…)`.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::Result;
use crate::intern::{AttributeKey, AttributeTable, LocationKey, LocationTable, StringTable, SymbolGate};
use crate::message::{ErrorCode, MessageTag};

pub const MAGIC: &[u8; 12] = b"QPERFSTREAM\0";
pub const WIRE_VERSION: u32 = 1;

/// `-1` stands for "no id" the way the original implementation's
/// `qint32 = -1` sentinel did; this stream widens it to `i64` so a
/// dense id is never at risk of colliding with the sentinel.
fn write_optional_id(payload: &mut Vec<u8>, id: Option<u32>) -> std::io::Result<()> {
    let raw: i64 = id.map_or(-1, |v| v as i64);
    payload.write_i64::<LittleEndian>(raw)
}

fn write_bytes_field(payload: &mut Vec<u8>, bytes: &[u8]) -> std::io::Result<()> {
    payload.write_u32::<LittleEndian>(bytes.len() as u32)?;
    payload.write_all(bytes)
}

fn write_optional_str(payload: &mut Vec<u8>, value: &Option<String>) -> std::io::Result<()> {
    match value {
        Some(s) => {
            payload.write_u8(1)?;
            write_bytes_field(payload, s.as_bytes())
        }
        None => payload.write_u8(0),
    }
}

fn write_optional_u64(payload: &mut Vec<u8>, value: Option<u64>) -> std::io::Result<()> {
    match value {
        Some(v) => {
            payload.write_u8(1)?;
            payload.write_u64::<LittleEndian>(v)
        }
        None => payload.write_u8(0),
    }
}

fn write_optional_u32(payload: &mut Vec<u8>, value: Option<u32>) -> std::io::Result<()> {
    match value {
        Some(v) => {
            payload.write_u8(1)?;
            payload.write_u32::<LittleEndian>(v)
        }
        None => payload.write_u8(0),
    }
}

/// Host/OS/perf-version/topology metadata carried by a single
/// `FeaturesDefinition` frame, emitted once near the start of the
/// stream.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub hostname: Option<String>,
    pub os_release: Option<String>,
    pub perf_version: Option<String>,
    pub arch: Option<String>,
    pub cpus_online: Option<u32>,
    pub cpus_available: Option<u32>,
    pub mem_total_bytes: Option<u64>,
    pub cmdline: Vec<String>,
    /// `(path, hex-encoded build id)`.
    pub build_ids: Vec<(String, String)>,
    pub topology: Option<String>,
}

pub struct StreamWriter<W: Write> {
    inner: W,
    strings: StringTable,
    locations: LocationTable,
    attributes: AttributeTable,
    symbols: SymbolGate,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        StreamWriter {
            inner,
            strings: StringTable::new(),
            locations: LocationTable::new(),
            attributes: AttributeTable::new(),
            symbols: SymbolGate::new(),
        }
    }

    /// Writes the 12-byte magic and the 4-byte little-endian wire
    /// version. Must be called exactly once, before any frame.
    pub fn write_header(&mut self) -> Result<()> {
        self.inner.write_all(MAGIC)?;
        self.inner.write_u32::<LittleEndian>(WIRE_VERSION)?;
        Ok(())
    }

    fn write_frame(&mut self, tag: MessageTag, payload: &[u8]) -> Result<()> {
        let length = 1u32 + payload.len() as u32;
        self.inner.write_u32::<LittleEndian>(length)?;
        self.inner.write_u8(tag as u8)?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    /// Interns `bytes`, emitting a `StringDefinition` the first time it
    /// is seen. Always returns the dense id, new or not.
    pub fn intern_string(&mut self, bytes: &[u8]) -> Result<u32> {
        let (id, is_new) = self.strings.intern(bytes);
        if is_new {
            let mut payload = Vec::with_capacity(8 + bytes.len());
            payload.write_u32::<LittleEndian>(id)?;
            write_bytes_field(&mut payload, bytes)?;
            self.write_frame(MessageTag::StringDefinition, &payload)?;
        }
        Ok(id)
    }

    /// Interns a location key, emitting a `LocationDefinition` the
    /// first time it is seen.
    pub fn intern_location(&mut self, key: LocationKey) -> Result<u32> {
        let (id, is_new) = self.locations.intern(key);
        if is_new {
            let mut payload = Vec::new();
            payload.write_u32::<LittleEndian>(id)?;
            payload.write_u64::<LittleEndian>(key.address)?;
            write_optional_id(&mut payload, key.file_string_id)?;
            payload.write_i32::<LittleEndian>(key.pid)?;
            payload.write_i32::<LittleEndian>(key.line)?;
            payload.write_i32::<LittleEndian>(key.column)?;
            write_optional_id(&mut payload, key.parent_location_id)?;
            self.write_frame(MessageTag::LocationDefinition, &payload)?;
        }
        Ok(id)
    }

    /// Interns an attribute key, emitting an `AttributesDefinition` the
    /// first time it is seen.
    pub fn intern_attribute(&mut self, key: AttributeKey, name_string_id: Option<u32>) -> Result<u32> {
        let (id, is_new) = self.attributes.intern(key);
        if is_new {
            let mut payload = Vec::new();
            payload.write_u32::<LittleEndian>(id)?;
            payload.write_u32::<LittleEndian>(key.attr_type)?;
            payload.write_u64::<LittleEndian>(key.config)?;
            write_optional_id(&mut payload, name_string_id)?;
            self.write_frame(MessageTag::AttributesDefinition, &payload)?;
        }
        Ok(id)
    }

    /// Emits a `SymbolDefinition` for `location_id`, gated so each
    /// location is only ever resolved once.
    pub fn emit_symbol(
        &mut self,
        location_id: u32,
        name_string_id: Option<u32>,
        binary_string_id: Option<u32>,
        is_kernel: bool,
    ) -> Result<()> {
        if !self.symbols.mark(location_id) {
            return Ok(());
        }
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(location_id)?;
        write_optional_id(&mut payload, name_string_id)?;
        write_optional_id(&mut payload, binary_string_id)?;
        payload.write_u8(is_kernel as u8)?;
        self.write_frame(MessageTag::SymbolDefinition, &payload)
    }

    pub fn emit_thread_start(&mut self, pid: i32, tid: i32, time: u64) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid)?;
        payload.write_i32::<LittleEndian>(tid)?;
        payload.write_u64::<LittleEndian>(time)?;
        self.write_frame(MessageTag::ThreadStart, &payload)
    }

    pub fn emit_thread_end(&mut self, pid: i32, tid: i32, time: u64) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid)?;
        payload.write_i32::<LittleEndian>(tid)?;
        payload.write_u64::<LittleEndian>(time)?;
        self.write_frame(MessageTag::ThreadEnd, &payload)
    }

    pub fn emit_command(&mut self, pid: i32, tid: i32, time: u64, comm_string_id: u32) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid)?;
        payload.write_i32::<LittleEndian>(tid)?;
        payload.write_u64::<LittleEndian>(time)?;
        payload.write_u32::<LittleEndian>(comm_string_id)?;
        self.write_frame(MessageTag::Command, &payload)
    }

    pub fn emit_lost(&mut self, pid: i32, tid: i32, time: u64) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid)?;
        payload.write_i32::<LittleEndian>(tid)?;
        payload.write_u64::<LittleEndian>(time)?;
        self.write_frame(MessageTag::LostDefinition, &payload)
    }

    pub fn emit_error(&mut self, code: ErrorCode, message: &str) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(code as u32)?;
        write_bytes_field(&mut payload, message.as_bytes())?;
        self.write_frame(MessageTag::Error, &payload)
    }

    pub fn emit_progress(&mut self, fraction: f32) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_f32::<LittleEndian>(fraction)?;
        self.write_frame(MessageTag::Progress, &payload)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_sample(
        &mut self,
        pid: i32,
        tid: i32,
        time: u64,
        frame_ids: &[u32],
        num_guessed_frames: u32,
        attribute_id: u32,
        period: u64,
        weight: u64,
    ) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid)?;
        payload.write_i32::<LittleEndian>(tid)?;
        payload.write_u64::<LittleEndian>(time)?;
        payload.write_u32::<LittleEndian>(frame_ids.len() as u32)?;
        for &id in frame_ids {
            payload.write_u32::<LittleEndian>(id)?;
        }
        payload.write_u32::<LittleEndian>(num_guessed_frames)?;
        payload.write_u32::<LittleEndian>(attribute_id)?;
        payload.write_u64::<LittleEndian>(period)?;
        payload.write_u64::<LittleEndian>(weight)?;
        self.write_frame(MessageTag::Sample, &payload)
    }

    pub fn emit_features(&mut self, features: &Features) -> Result<()> {
        let mut payload = Vec::new();
        write_optional_str(&mut payload, &features.hostname)?;
        write_optional_str(&mut payload, &features.os_release)?;
        write_optional_str(&mut payload, &features.perf_version)?;
        write_optional_str(&mut payload, &features.arch)?;
        write_optional_u32(&mut payload, features.cpus_online)?;
        write_optional_u32(&mut payload, features.cpus_available)?;
        write_optional_u64(&mut payload, features.mem_total_bytes)?;

        payload.write_u32::<LittleEndian>(features.cmdline.len() as u32)?;
        for arg in &features.cmdline {
            write_bytes_field(&mut payload, arg.as_bytes())?;
        }

        payload.write_u32::<LittleEndian>(features.build_ids.len() as u32)?;
        for (path, build_id) in &features.build_ids {
            write_bytes_field(&mut payload, path.as_bytes())?;
            write_bytes_field(&mut payload, build_id.as_bytes())?;
        }

        write_optional_str(&mut payload, &features.topology)?;
        self.write_frame(MessageTag::FeaturesDefinition, &payload)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn frame_at(bytes: &[u8], offset: usize) -> (u8, usize, usize) {
        let mut cursor = Cursor::new(&bytes[offset..offset + 4]);
        let length = cursor.read_u32::<LittleEndian>().unwrap() as usize;
        let tag = bytes[offset + 4];
        (tag, length, offset + 4 + length)
    }

    #[test]
    fn header_matches_magic_and_version() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.write_header().unwrap();
        let bytes = writer.into_inner();
        assert_eq!(&bytes[0..12], MAGIC);
        let version = (&bytes[12..16]).read_u32::<LittleEndian>().unwrap();
        assert_eq!(version, WIRE_VERSION);
    }

    #[test]
    fn string_is_defined_once_and_referenced_by_id() {
        let mut writer = StreamWriter::new(Vec::new());
        let id_a = writer.intern_string(b"main").unwrap();
        let id_b = writer.intern_string(b"main").unwrap();
        assert_eq!(id_a, id_b);
        let bytes = writer.into_inner();
        // Exactly one StringDefinition frame exists in the buffer.
        let (tag, _len, end) = frame_at(&bytes, 0);
        assert_eq!(tag, MessageTag::StringDefinition as u8);
        assert_eq!(end, bytes.len());
    }

    #[test]
    fn symbol_definition_emitted_once_per_location() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.emit_symbol(3, None, None, false).unwrap();
        writer.emit_symbol(3, None, None, false).unwrap();
        let bytes = writer.into_inner();
        let (tag, _len, end) = frame_at(&bytes, 0);
        assert_eq!(tag, MessageTag::SymbolDefinition as u8);
        assert_eq!(end, bytes.len());
    }

    #[test]
    fn sample_frame_length_covers_tag_and_payload() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.emit_sample(1, 1, 10, &[4, 5, 6], 0, 0, 1000, 1).unwrap();
        let bytes = writer.into_inner();
        let (tag, _len, end) = frame_at(&bytes, 0);
        assert_eq!(tag, MessageTag::Sample as u8);
        assert_eq!(end, bytes.len());
    }
}
