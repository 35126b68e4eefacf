//! Symbol demangling: Itanium C++ ABI, Rust v0, and D, in that order,
//! falling back to the raw name. Grounded on `samply-symbols::demangle`'s
//! `demangle_any` dispatch-by-prefix structure.

/// Attempts Itanium C++ demangling (`_Z` prefix), then Rust v0 demangling
/// (`_R` prefix), then D demangling (`_D` prefix), returning the raw name
/// unchanged if none apply or all fail.
///
/// No D-language demangler exists anywhere in this workspace's dependency
/// stack; `_D`-prefixed names are recognized but passed through
/// unmangled rather than inventing a fake dependency for them.
pub fn demangle_any(name: &str) -> String {
    if name.starts_with("_R") {
        if let Ok(demangled) = rustc_demangle::try_demangle(name) {
            return format!("{demangled:#}");
        }
    }
    if name.starts_with("_Z") {
        if let Ok(sym) = cpp_demangle::Symbol::new(name) {
            if let Ok(demangled) = sym.demangle(&cpp_demangle::DemangleOptions::default()) {
                return demangled;
            }
        }
    }
    if name.starts_with("_D") {
        // No D demangler available in the dependency stack; pass through.
        return name.to_string();
    }
    // Legacy Rust (pre-v0) mangling has no reserved prefix distinct from
    // a plain C symbol; try it last since `try_demangle` only succeeds on
    // names it actually recognizes.
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{demangled:#}");
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpp_demangling() {
        assert_eq!(demangle_any("_Z3fooi"), "foo(int)");
    }

    #[test]
    fn rust_v0_demangling() {
        // A representative v0-mangled name for `foo::bar::baz`.
        let mangled = "_RNvNtCs1234_3foo3bar3baz";
        let out = demangle_any(mangled);
        assert!(out.contains("bar") && out.contains("baz"));
    }

    #[test]
    fn d_prefixed_name_passes_through() {
        assert_eq!(demangle_any("_D4test3fooFZv"), "_D4test3fooFZv");
    }

    #[test]
    fn unrecognized_name_passes_through() {
        assert_eq!(demangle_any("plain_symbol"), "plain_symbol");
    }
}
