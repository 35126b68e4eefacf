//! CLI surface, parsed with `clap`'s derive API the way `samply::cli::Opt`
//! parses its own arguments, then validated into a typed `Config`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "qperf", about = "Batch post-processor for Linux perf.data recordings")]
pub struct Opt {
    /// perf.data file to read; omit to read from stdin.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Where to write the framed output stream; omit to write to stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Alternative TCP source host, used together with --port.
    #[arg(long)]
    pub host: Option<String>,

    /// Alternative TCP source port, used together with --host.
    #[arg(long)]
    pub port: Option<u16>,

    /// Root used to resolve a mapped file's original path when nothing
    /// more specific matches.
    #[arg(long, default_value = "/")]
    pub sysroot: PathBuf,

    /// Colon-separated debug-info search paths, each tried as
    /// `<path>/<build-id-hex>/elf`.
    #[arg(long)]
    pub debug: Option<String>,

    /// Colon-separated extra library search paths, searched recursively
    /// by file basename.
    #[arg(long)]
    pub extra: Option<String>,

    /// Application binary directory, searched by basename.
    #[arg(long)]
    pub app: Option<PathBuf>,

    /// Kernel symbol table path (defaults to /proc/kallsyms).
    #[arg(long)]
    pub kallsyms: Option<PathBuf>,

    /// Fallback architecture name, used when a sample carries no
    /// attribute-derived hint.
    #[arg(long)]
    pub arch: Option<String>,

    /// Heuristic reorder buffer size in KiB; 0 disables the heuristic and
    /// relies solely on FINISHED_ROUND.
    #[arg(long, default_value_t = 64 * 1024)]
    pub buffer_size: u64,

    /// Unwind depth cap; -1 means unlimited.
    #[arg(long, default_value_t = -1)]
    pub max_frames: i64,

    /// Emit statistics instead of the normal framed stream.
    #[arg(long)]
    pub print_stats: bool,
}

/// Validated configuration the driver actually runs with; owns parsed
/// search-path lists and a resolved `max_frames`/`buffer_size` pair so the
/// driver never re-parses a string mid-run.
#[derive(Debug, Clone)]
pub struct Config {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub sysroot: PathBuf,
    pub debug_paths: Vec<PathBuf>,
    pub extra_paths: Vec<PathBuf>,
    pub app_path: Option<PathBuf>,
    pub kallsyms: Option<PathBuf>,
    pub arch: Option<String>,
    pub buffer_size_bytes: usize,
    pub max_frames: Option<usize>,
    pub print_stats: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("--host was given without --port (or vice versa)")]
    IncompleteTcpAddress,
}

fn split_paths(list: &Option<String>) -> Vec<PathBuf> {
    list.as_deref()
        .map(|s| s.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect())
        .unwrap_or_default()
}

impl TryFrom<Opt> for Config {
    type Error = ConfigError;

    fn try_from(opt: Opt) -> Result<Self, Self::Error> {
        if opt.host.is_some() != opt.port.is_some() {
            return Err(ConfigError::IncompleteTcpAddress);
        }
        Ok(Config {
            input: opt.input,
            output: opt.output,
            host: opt.host,
            port: opt.port,
            sysroot: opt.sysroot,
            debug_paths: split_paths(&opt.debug),
            extra_paths: split_paths(&opt.extra),
            app_path: opt.app,
            kallsyms: opt.kallsyms,
            arch: opt.arch,
            buffer_size_bytes: (opt.buffer_size as usize).saturating_mul(1024),
            max_frames: if opt.max_frames < 0 {
                None
            } else {
                Some(opt.max_frames as usize)
            },
            print_stats: opt.print_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_opt() -> Opt {
        Opt {
            input: None,
            output: None,
            host: None,
            port: None,
            sysroot: PathBuf::from("/"),
            debug: Some("/a:/b".to_string()),
            extra: None,
            app: None,
            kallsyms: None,
            arch: None,
            buffer_size: 64,
            max_frames: -1,
            print_stats: false,
        }
    }

    #[test]
    fn negative_max_frames_means_unlimited() {
        let config = Config::try_from(base_opt()).unwrap();
        assert_eq!(config.max_frames, None);
    }

    #[test]
    fn debug_paths_split_on_colon() {
        let config = Config::try_from(base_opt()).unwrap();
        assert_eq!(config.debug_paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn mismatched_host_port_is_rejected() {
        let mut opt = base_opt();
        opt.host = Some("localhost".to_string());
        assert!(Config::try_from(opt).is_err());
    }
}
