use std::io;

/// Errors that can terminate the whole decode stream.
///
/// Per-record problems that must not abort the stream (unknown record
/// types, a sample arriving late) are logged via the `log` facade instead
/// of being represented here.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("unrecognized perf.data magic value")]
    BadMagic,

    #[error("truncated or malformed perf.data header")]
    HeaderError,

    #[error("record size {size} is smaller than the record header")]
    RecordTooSmall { size: u32 },

    #[error("sample-id lookup on a non-seekable source with multiple attributes")]
    SignalError,

    #[error("feature section for bit {0} is out of bounds")]
    BadFeatureSection(u32),

    #[error("attribute table entry is malformed")]
    BadAttr,

    #[error("I/O error reading perf.data stream")]
    Io(#[from] io::Error),
}

/// Returned by the record-at-a-time decoder.
#[derive(Debug)]
pub enum Status<T> {
    /// A value was fully decoded.
    Ok(T),
    /// The source did not have enough bytes for a full record; the caller
    /// should supply more input and call again. No partial record state is
    /// lost other than the already-parsed header.
    NeedMore,
}

pub type Result<T> = std::result::Result<T, Error>;
