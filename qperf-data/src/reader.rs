use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use crate::attr::Attr;
use crate::error::{Error, Result};
use crate::header::{parse_feature_sections, parse_header, Endian, FeatureSections, FileSection, Header};
use crate::record::{parse_record_body, Record, RecordHeader, PERF_RECORD_FINISHED_ROUND};

/// One attribute plus the 64-bit ids bound to it in the file's attribute
/// table (or discovered via EVENT_DESC / pipe-mode HEADER_ATTR records).
#[derive(Debug, Clone)]
pub struct AttributeDescription {
    pub attr: Attr,
    pub ids: Vec<u64>,
}

/// A decoded record paired with the attribute index that governs it (for
/// SAMPLE records) or `None` for records with no governing attribute.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub attr_index: Option<usize>,
    pub record: Record,
}

/// Parses the header, the attribute table (file mode) and the feature
/// section table, then exposes a record-at-a-time iterator over the data
/// section.
pub struct PerfFileReader<R> {
    reader: R,
    endian: Endian,
    attributes: Vec<AttributeDescription>,
    id_to_attr_index: HashMap<u64, usize>,
    id_parse_info: IdParseInfoResolved,
    pub features: FeatureSections,
    data_end: u64,
    seekable: bool,
}

enum IdParseInfoResolved {
    OnlyOneAttr,
    Uniform,
    PerAttribute,
}

impl<R: Read + Seek> PerfFileReader<R> {
    /// Opens a seekable (file-mode) perf.data stream: parses the header,
    /// the attribute table, and the feature sections, then positions the
    /// reader at the start of the data section.
    pub fn open(mut reader: R) -> Result<Self> {
        let (endian, header) = parse_header(&mut reader)?;
        let file_header = match header {
            Header::File(f) => f,
            Header::Pipe => {
                return Self::open_pipe(reader, endian);
            }
        };

        let mut attributes = Vec::new();
        let num_attrs = if file_header.attr_size > 0 {
            file_header.attrs.size / file_header.attr_size
        } else {
            0
        };
        for i in 0..num_attrs {
            let entry_offset = file_header.attrs.offset + i * file_header.attr_size;
            reader.seek(SeekFrom::Start(entry_offset))?;
            let attr = match endian {
                Endian::Little => Attr::parse::<R, LittleEndian>(&mut reader)?,
                Endian::Big => Attr::parse::<R, BigEndian>(&mut reader)?,
            };
            // Each `perf_file_attr` entry is the attr struct followed by a
            // `perf_file_section` pointing at this attribute's ids table
            // elsewhere in the file (one u64 per bound sample id).
            let ids_section = match endian {
                Endian::Little => FileSection::parse::<R, LittleEndian>(&mut reader)?,
                Endian::Big => FileSection::parse::<R, BigEndian>(&mut reader)?,
            };
            let ids = read_ids_table(&mut reader, ids_section, endian)?;
            attributes.push(AttributeDescription { attr, ids });
        }

        reader.seek(SeekFrom::Start(
            file_header.data.offset + file_header.data.size,
        ))?;
        let features = match endian {
            Endian::Little => {
                parse_feature_sections::<R, LittleEndian>(&mut reader, file_header.feature_bits)?
            }
            Endian::Big => {
                parse_feature_sections::<R, BigEndian>(&mut reader, file_header.feature_bits)?
            }
        };

        let mut id_to_attr_index = HashMap::new();
        for (index, desc) in attributes.iter().enumerate() {
            for id in &desc.ids {
                id_to_attr_index.insert(*id, index);
            }
        }

        let id_parse_info = resolve_id_parse_info(&attributes);

        reader.seek(SeekFrom::Start(file_header.data.offset))?;

        Ok(PerfFileReader {
            reader,
            endian,
            attributes,
            id_to_attr_index,
            id_parse_info,
            features,
            data_end: file_header.data.offset + file_header.data.size,
            seekable: true,
        })
    }

    fn open_pipe(reader: R, endian: Endian) -> Result<Self> {
        Ok(PerfFileReader {
            reader,
            endian,
            attributes: Vec::new(),
            id_to_attr_index: HashMap::new(),
            id_parse_info: IdParseInfoResolved::OnlyOneAttr,
            features: FeatureSections::default(),
            data_end: u64::MAX,
            seekable: false,
        })
    }

    pub fn attributes(&self) -> &[AttributeDescription] {
        &self.attributes
    }

    /// Reads and decodes the next record, or `Ok(None)` at end of data.
    pub fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        if self.seekable {
            let pos = self.reader.stream_position()?;
            if pos >= self.data_end {
                return Ok(None);
            }
        }

        let header = match self.endian {
            Endian::Little => match RecordHeader::parse::<R, LittleEndian>(&mut self.reader) {
                Ok(h) => h,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            },
            Endian::Big => match RecordHeader::parse::<R, BigEndian>(&mut self.reader) {
                Ok(h) => h,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            },
        };

        if header.record_type == PERF_RECORD_FINISHED_ROUND {
            return Ok(Some(DecodedRecord {
                attr_index: None,
                record: Record::FinishedRound,
            }));
        }

        let attr_index = self.resolve_attr_index(&header)?;
        let attr = attr_index.map(|i| &self.attributes[i].attr);

        let record = match self.endian {
            Endian::Little => parse_record_body::<R, LittleEndian>(&mut self.reader, header, attr)?,
            Endian::Big => parse_record_body::<R, BigEndian>(&mut self.reader, header, attr)?,
        };

        Ok(Some(DecodedRecord { attr_index, record }))
    }

    /// Determines which attribute governs this record. On a seekable
    /// source with more than one attribute, peeks the id at its
    /// fixed offset and rewinds; on a pipe source this is only possible
    /// when every attribute shares the same `sample_type`, otherwise the
    /// record is rejected with `SignalError` (documented limitation).
    fn resolve_attr_index(&mut self, header: &RecordHeader) -> Result<Option<usize>> {
        if self.attributes.is_empty() {
            return Ok(None);
        }
        match self.id_parse_info {
            IdParseInfoResolved::OnlyOneAttr => Ok(Some(0)),
            IdParseInfoResolved::Uniform => Ok(Some(0)),
            IdParseInfoResolved::PerAttribute => {
                if !self.seekable {
                    return Err(Error::SignalError);
                }
                let start = self.reader.stream_position()?;
                let body_len = header.size as u64 - RecordHeader::SIZE as u64;
                let mut buf = vec![0u8; body_len as usize];
                self.reader.read_exact(&mut buf)?;
                self.reader.seek(SeekFrom::Start(start))?;
                let id = peek_id_at_fixed_offset(&buf, &self.attributes[0].attr, self.endian);
                let index = id
                    .and_then(|id| self.id_to_attr_index.get(&id).copied())
                    .unwrap_or(0);
                Ok(Some(index))
            }
        }
    }
}

/// Reads an attribute's ids table (each entry one `u64` sample id bound to
/// that attribute) out of the section it points to, restoring the
/// reader's position to where it was before the jump.
fn read_ids_table<R: Read + Seek>(
    reader: &mut R,
    section: FileSection,
    endian: Endian,
) -> Result<Vec<u64>> {
    if section.size == 0 {
        return Ok(Vec::new());
    }
    let resume_at = reader.stream_position()?;
    reader.seek(SeekFrom::Start(section.offset))?;
    let count = (section.size / 8) as usize;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let id = match endian {
            Endian::Little => reader.read_u64::<LittleEndian>()?,
            Endian::Big => reader.read_u64::<BigEndian>()?,
        };
        ids.push(id);
    }
    reader.seek(SeekFrom::Start(resume_at))?;
    Ok(ids)
}

fn resolve_id_parse_info(attributes: &[AttributeDescription]) -> IdParseInfoResolved {
    if attributes.len() <= 1 {
        return IdParseInfoResolved::OnlyOneAttr;
    }
    let first_sample_type = attributes[0].attr.sample_type;
    if attributes
        .iter()
        .all(|a| a.attr.sample_type == first_sample_type)
    {
        IdParseInfoResolved::Uniform
    } else {
        IdParseInfoResolved::PerAttribute
    }
}

/// Reads the `id`/`identifier` field at its fixed offset from a buffered
/// record body, using `attr`'s `sample_type` to locate it. Returns `None`
/// if neither field is present in this sample type.
fn peek_id_at_fixed_offset(body: &[u8], attr: &Attr, endian: Endian) -> Option<u64> {
    use crate::attr::SampleType;
    let st = attr.sample_type;
    if st.contains(SampleType::IDENTIFIER) {
        return read_u64_at(body, 0, endian);
    }
    if !st.contains(SampleType::ID) {
        return None;
    }
    let mut offset = 0usize;
    if st.contains(SampleType::IP) {
        offset += 8;
    }
    if st.contains(SampleType::TID) {
        offset += 8;
    }
    if st.contains(SampleType::TIME) {
        offset += 8;
    }
    if st.contains(SampleType::ADDR) {
        offset += 8;
    }
    read_u64_at(body, offset, endian)
}

fn read_u64_at(body: &[u8], offset: usize, endian: Endian) -> Option<u64> {
    let bytes = body.get(offset..offset + 8)?;
    Some(match endian {
        Endian::Little => LittleEndian::read_u64(bytes),
        Endian::Big => BigEndian::read_u64(bytes),
    })
}
