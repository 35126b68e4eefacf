use byteorder::{BigEndian, LittleEndian};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::Cursor;

use crate::attr::Attr;
use crate::error::{Error, Result, Status};
use crate::header::Endian;
use crate::record::{parse_record_body, Record, RecordHeader, PERF_RECORD_FINISHED_ROUND};
use crate::reader::DecodedRecord;

/// Incremental decoder for a non-seekable source (stdin, a TCP socket):
/// bytes are pushed in with `feed`, and `poll` yields one record at a
/// time, returning `NeedMore` at a record boundary rather than blocking.
/// Pipe-mode streams carry no attribute table; attributes instead arrive
/// in-band as `PERF_RECORD_HEADER_ATTR` pseudo records, which this type
/// intercepts to maintain its own id-to-attribute map before handing
/// later records their matching attribute.
pub struct PipeDecoder {
    endian: Endian,
    buf: VecDeque<u8>,
    attributes: Vec<Attr>,
    id_to_attr_index: HashMap<u64, usize>,
}

impl PipeDecoder {
    pub fn new(endian: Endian) -> Self {
        PipeDecoder {
            endian,
            buf: VecDeque::new(),
            attributes: Vec::new(),
            id_to_attr_index: HashMap::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().copied());
    }

    pub fn attributes(&self) -> &[Attr] {
        &self.attributes
    }

    /// Attempts to decode one record from the buffered bytes. Consumes
    /// nothing from the buffer unless a whole record is available.
    pub fn poll(&mut self) -> Result<Status<DecodedRecord>> {
        if self.buf.len() < RecordHeader::SIZE {
            return Ok(Status::NeedMore);
        }
        let header_bytes: Vec<u8> = self.buf.iter().take(RecordHeader::SIZE).copied().collect();
        let header = {
            let mut cursor = Cursor::new(&header_bytes);
            match self.endian {
                Endian::Little => RecordHeader::parse::<_, LittleEndian>(&mut cursor)?,
                Endian::Big => RecordHeader::parse::<_, BigEndian>(&mut cursor)?,
            }
        };

        if self.buf.len() < header.size as usize {
            return Ok(Status::NeedMore);
        }

        let whole: Vec<u8> = self.buf.drain(..header.size as usize).collect();
        let body = &whole[RecordHeader::SIZE..];

        if header.record_type == PERF_RECORD_FINISHED_ROUND {
            return Ok(Status::Ok(DecodedRecord {
                attr_index: None,
                record: Record::FinishedRound,
            }));
        }

        let mut cursor = Cursor::new(body);
        let record = match self.endian {
            Endian::Little => {
                parse_record_body::<_, LittleEndian>(&mut cursor, header, self.attr_for(&header))?
            }
            Endian::Big => {
                parse_record_body::<_, BigEndian>(&mut cursor, header, self.attr_for(&header))?
            }
        };

        if let Record::AttrDefinition(attr, ids) = &record {
            let index = self.attributes.len();
            self.attributes.push(attr.clone());
            for id in ids {
                self.id_to_attr_index.insert(*id, index);
            }
            return Ok(Status::Ok(DecodedRecord {
                attr_index: Some(index),
                record,
            }));
        }

        let attr_index = self.resolve_index(&record);
        Ok(Status::Ok(DecodedRecord { attr_index, record }))
    }

    fn attr_for(&self, header: &RecordHeader) -> Option<&Attr> {
        let _ = header;
        if self.attributes.len() == 1 {
            Some(&self.attributes[0])
        } else {
            // Multiple attributes on a pipe source with no seek capability:
            // per the documented limitation, SAMPLE disambiguation is not
            // attempted; the first-known attribute is used for field
            // layout and the real id is resolved afterwards if possible.
            self.attributes.first()
        }
    }

    fn resolve_index(&self, record: &Record) -> Option<usize> {
        if self.attributes.len() <= 1 {
            return if self.attributes.is_empty() {
                None
            } else {
                Some(0)
            };
        }
        match record {
            Record::Sample(s) => s
                .id
                .or(s.identifier)
                .and_then(|id| self.id_to_attr_index.get(&id).copied()),
            _ => Some(0),
        }
    }
}

/// Returns `SignalError` for the documented pipe + multi-attribute +
/// sample-id limitation, matching `resolve_index`'s `None` result for a
/// SAMPLE whose id didn't match anything known.
pub fn reject_unresolved(attr_index: Option<usize>, record: &Record) -> Result<()> {
    if attr_index.is_none() && matches!(record, Record::Sample(_)) {
        return Err(Error::SignalError);
    }
    Ok(())
}
