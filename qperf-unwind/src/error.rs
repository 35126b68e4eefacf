#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("unrecognized architecture {0:?}")]
    UnknownArchitecture(String),

    #[error("unwind engine error: {0}")]
    Engine(String),

    #[error("memory read at {addr:#x} exceeded PERF_CONTEXT_MAX or the sample's stack/ELF bounds")]
    MemoryOutOfRange { addr: u64 },

    #[error("symbol cache was invalidated mid-unwind and the retry also invalidated it")]
    CacheInvalidatedTwice,
}

pub type Result<T> = std::result::Result<T, Error>;
