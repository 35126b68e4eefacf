//! Frame tags and the error-code taxonomy carried in `Error` messages.
//! Tag order and numbering are this stream's own; they do not need to
//! match the analogous enum in any other implementation of this wire
//! format, only to stay stable within one.

/// One byte identifying the frame payload's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    ThreadStart = 0,
    ThreadEnd = 1,
    Command = 2,
    LocationDefinition = 3,
    SymbolDefinition = 4,
    AttributesDefinition = 5,
    StringDefinition = 6,
    LostDefinition = 7,
    FeaturesDefinition = 8,
    Error = 9,
    Progress = 10,
    Sample = 11,
}

/// Recoverable conditions surfaced to the consumer as an `Error` frame
/// rather than aborting the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    TimeOrderViolation = 1,
    MissingElfFile = 2,
    InvalidKallsyms = 3,
}
