//! The sink side of `--output`/`--host`+`--port`: mirrors `input::Source`
//! but for writes.

use std::io::Write;

use crate::config::Config;

pub enum Sink {
    File(std::fs::File),
    Stdout(std::io::Stdout),
}

impl Sink {
    pub fn open(config: &Config) -> std::io::Result<Self> {
        match &config.output {
            Some(path) => std::fs::File::create(path).map(Sink::File),
            None => Ok(Sink::Stdout(std::io::stdout())),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Stdout(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Stdout(s) => s.flush(),
        }
    }
}
