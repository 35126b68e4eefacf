//! Wraps whichever byte source the CLI selected (file, stdin, TCP) behind
//! the decoder that matches its seekability: a regular file goes through
//! `PerfFileReader` since real perf.data recordings on disk are always
//! written in file-mode; stdin and TCP sources are read incrementally and
//! go through `PipeDecoder`, matching how `perf record -o -` actually
//! streams events.

use std::io::Read;
use std::net::TcpStream;

use qperf_data::{DecodedRecord, Endian, Error as DataError, PerfFileReader, PipeDecoder, Status};

use crate::config::Config;

const MAGIC_LE: &[u8; 8] = b"PERFILE2";
const MAGIC_BE: &[u8; 8] = b"2ELIFREP";
const PIPE_HEADER_SIZE: u64 = 16;

#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("could not open input: {0}")]
    Open(#[source] std::io::Error),

    #[error("could not connect to {host}:{port}: {source}")]
    Socket {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognized perf.data magic value")]
    BadMagic,

    #[error(transparent)]
    Decode(#[from] DataError),
}

pub enum Source {
    File(std::fs::File),
    Stdin(std::io::Stdin),
    Tcp(TcpStream),
}

impl Source {
    pub fn open(config: &Config) -> Result<Self, InputError> {
        if let (Some(host), Some(port)) = (&config.host, config.port) {
            let stream = TcpStream::connect((host.as_str(), port)).map_err(|source| {
                InputError::Socket {
                    host: host.clone(),
                    port,
                    source,
                }
            })?;
            return Ok(Source::Tcp(stream));
        }
        match &config.input {
            Some(path) => std::fs::File::open(path)
                .map(Source::File)
                .map_err(InputError::Open),
            None => Ok(Source::Stdin(std::io::stdin())),
        }
    }

    fn is_seekable_file(&self) -> bool {
        matches!(self, Source::File(_))
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::File(f) => f.read(buf),
            Source::Stdin(s) => s.read(buf),
            Source::Tcp(s) => s.read(buf),
        }
    }
}

pub enum Decoder {
    File(PerfFileReader<std::io::Cursor<Vec<u8>>>),
    Pipe(PipeDecoder),
}

impl Decoder {
    /// Reads the whole source into memory (this is a batch post-processor,
    /// not a bounded-memory streaming tool) and picks the matching decoder.
    pub fn open(mut source: Source) -> Result<Self, InputError> {
        let seekable = source.is_seekable_file();
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes).map_err(InputError::Open)?;

        if bytes.len() < 16 {
            return Err(InputError::BadMagic);
        }
        let endian = if bytes[0..8] == *MAGIC_LE {
            Endian::Little
        } else if bytes[0..8] == *MAGIC_BE {
            Endian::Big
        } else {
            return Err(InputError::BadMagic);
        };

        if seekable {
            let cursor = std::io::Cursor::new(bytes);
            let reader = PerfFileReader::open(cursor)?;
            return Ok(Decoder::File(reader));
        }

        // A non-seekable source always carries the pipe-mode header (a
        // file-mode header's section offsets can't be located without
        // seeking), so the second header word is `PIPE_HEADER_SIZE`.
        debug_assert_eq!(read_u64(&bytes[8..16], endian), PIPE_HEADER_SIZE);
        let mut decoder = PipeDecoder::new(endian);
        decoder.feed(&bytes[16..]);
        Ok(Decoder::Pipe(decoder))
    }

    pub fn attribute_for(&self, attr_index: Option<usize>) -> Option<qperf_data::Attr> {
        let index = attr_index?;
        match self {
            Decoder::File(reader) => reader.attributes().get(index).map(|d| d.attr.clone()),
            Decoder::Pipe(decoder) => decoder.attributes().get(index).cloned(),
        }
    }

    pub fn next(&mut self) -> Result<Option<DecodedRecord>, InputError> {
        match self {
            Decoder::File(reader) => Ok(reader.next_record()?),
            Decoder::Pipe(decoder) => match decoder.poll()? {
                Status::Ok(decoded) => Ok(Some(decoded)),
                Status::NeedMore => Ok(None),
            },
        }
    }
}

fn read_u64(bytes: &[u8], endian: Endian) -> u64 {
    let array: [u8; 8] = bytes.try_into().expect("8-byte slice");
    match endian {
        Endian::Little => u64::from_le_bytes(array),
        Endian::Big => u64::from_be_bytes(array),
    }
}
