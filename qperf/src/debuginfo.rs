//! Locates a local file to read DWARF/symbol data from for a mapped
//! file, given the search paths configured on the command line.
//!
//! Grounded on `PerfSymbolTable::applyPath`/`findImageFile`-style
//! fallback chains referenced throughout `perfunwind.cpp`: a build-id
//! keyed debug store wins, then the application directory, then a
//! recursive search under each extra library path, then the sysroot
//! applied to the original path verbatim.

use std::path::{Path, PathBuf};

use crate::config::Config;

pub fn locate(config: &Config, original_path: &str, build_id: Option<&[u8]>) -> Option<PathBuf> {
    if let Some(build_id) = build_id {
        let hex = hex_encode(build_id);
        for debug_path in &config.debug_paths {
            let candidate = debug_path.join(&hex).join("elf");
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let basename = Path::new(original_path).file_name()?;

    if let Some(app_path) = &config.app_path {
        if let Some(found) = find_by_basename(app_path, basename) {
            return Some(found);
        }
    }

    for extra_path in &config.extra_paths {
        if let Some(found) = find_by_basename(extra_path, basename) {
            return Some(found);
        }
    }

    let rooted = join_under_sysroot(&config.sysroot, original_path);
    if rooted.is_file() {
        return Some(rooted);
    }

    None
}

fn join_under_sysroot(sysroot: &Path, original_path: &str) -> PathBuf {
    let relative = original_path.trim_start_matches('/');
    sysroot.join(relative)
}

/// Walks `root` depth-first looking for an entry whose file name matches
/// `basename`. Bounded by the filesystem itself; a misconfigured
/// `--extra`/`--app` path with a huge tree is the caller's problem, not
/// this function's.
fn find_by_basename(root: &Path, basename: &std::ffi::OsStr) -> Option<PathBuf> {
    let direct = root.join(basename);
    if direct.is_file() {
        return Some(direct);
    }

    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_by_basename(&path, basename) {
                return Some(found);
            }
        } else if path.file_name() == Some(basename) {
            return Some(path);
        }
    }
    None
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config(tmp: &Path) -> Config {
        Config {
            input: None,
            output: None,
            host: None,
            port: None,
            sysroot: tmp.join("sysroot"),
            debug_paths: vec![tmp.join("debug")],
            extra_paths: vec![tmp.join("extra")],
            app_path: Some(tmp.join("app")),
            kallsyms: None,
            arch: None,
            buffer_size_bytes: 0,
            max_frames: None,
            print_stats: false,
        }
    }

    #[test]
    fn build_id_store_wins_over_everything_else() {
        let tmp = tempfile::tempdir().unwrap();
        let build_id = [0xabu8, 0xcd, 0xef];
        let debug_dir = tmp.path().join("debug").join("abcdef");
        fs::create_dir_all(&debug_dir).unwrap();
        fs::write(debug_dir.join("elf"), b"elf bytes").unwrap();

        let config = test_config(tmp.path());
        let found = locate(&config, "/usr/lib/libfoo.so", Some(&build_id)).unwrap();
        assert_eq!(found, debug_dir.join("elf"));
    }

    #[test]
    fn falls_back_to_sysroot_when_nothing_else_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let rooted = tmp.path().join("sysroot").join("usr/lib/libfoo.so");
        fs::create_dir_all(rooted.parent().unwrap()).unwrap();
        fs::write(&rooted, b"elf bytes").unwrap();

        let config = test_config(tmp.path());
        let found = locate(&config, "/usr/lib/libfoo.so", None).unwrap();
        assert_eq!(found, rooted);
    }

    #[test]
    fn recursive_extra_search_finds_nested_basename() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("extra").join("nested").join("dir");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("libfoo.so"), b"elf bytes").unwrap();

        let config = test_config(tmp.path());
        let found = locate(&config, "/usr/lib/libfoo.so", None).unwrap();
        assert_eq!(found, nested.join("libfoo.so"));
    }
}
