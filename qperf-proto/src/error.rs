use std::io;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error writing the output stream")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
