use std::io;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("could not open ELF file {path}")]
    CouldNotOpenElf { path: String, source: io::Error },

    #[error("could not parse ELF file {path}")]
    MalformedElf {
        path: String,
        source: object::Error,
    },

    #[error("ELF file {path} has no .debug_info section and no symbol table")]
    NoSymbols { path: String },

    #[error("could not parse DWARF in {path}")]
    MalformedDwarf {
        path: String,
        #[source]
        source: gimli::Error,
    },

    #[error("could not read kallsyms from {path}")]
    InvalidKallsyms { path: String, source: io::Error },

    #[error("address {addr:#x} is out of range for its registered ELF mapping")]
    AddressOutOfRange { addr: u64 },

    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal conditions surfaced to the output stream as a `Diagnostic`
/// rather than failing the pipeline. Mirrors the taxonomy's "Recoverable"
/// category.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    MissingElfFile { path: String },
    InvalidKallsyms { reason: String },
}
