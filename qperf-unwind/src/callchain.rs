//! Decodes the kernel-supplied call-chain as a fallback (or supplement)
//! to DWARF unwinding: `PERF_CONTEXT_KERNEL`/`PERF_CONTEXT_USER`/
//! `PERF_CONTEXT_HV` sentinels toggle which symbol table subsequent
//! entries resolve against, and a spuriously dropped top user frame is
//! repaired by re-prepending the sample's recorded IP.

use qperf_data::{PERF_CONTEXT_HV, PERF_CONTEXT_KERNEL, PERF_CONTEXT_MAX, PERF_CONTEXT_USER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDomain {
    Kernel,
    User,
    Hypervisor,
}

#[derive(Debug, Clone, Copy)]
pub struct ChainEntry {
    pub pc: u64,
    pub domain: ChainDomain,
}

/// Splits the raw `ip_chain` (as recorded in `SampleRecord::callchain`)
/// into `(pc, domain)` pairs, dropping the sentinel entries themselves.
/// Entries before the first sentinel are assumed to be user frames,
/// matching the kernel's own default when `PERF_SAMPLE_CALLCHAIN` is
/// requested without `perf_event_attr::exclude_callchain_kernel`.
pub fn decode(ip_chain: &[u64], sample_ip: u64) -> Vec<ChainEntry> {
    let mut domain = ChainDomain::User;
    let mut entries = Vec::with_capacity(ip_chain.len());
    for &raw in ip_chain {
        if raw >= PERF_CONTEXT_MAX {
            domain = match raw {
                PERF_CONTEXT_KERNEL => ChainDomain::Kernel,
                PERF_CONTEXT_USER => ChainDomain::User,
                PERF_CONTEXT_HV => ChainDomain::Hypervisor,
                _ => domain,
            };
            continue;
        }
        entries.push(ChainEntry { pc: raw, domain });
    }
    repair_missing_top_frame(entries, sample_ip)
}

/// The kernel sometimes omits the innermost user frame from the chain
/// (it is already available as `sample.ip`); if the first user entry
/// doesn't match, prepend it.
fn repair_missing_top_frame(mut entries: Vec<ChainEntry>, sample_ip: u64) -> Vec<ChainEntry> {
    match entries.first() {
        Some(first) if first.domain == ChainDomain::User && first.pc == sample_ip => entries,
        _ => {
            entries.insert(
                0,
                ChainEntry {
                    pc: sample_ip,
                    domain: ChainDomain::User,
                },
            );
            entries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentinels_and_keeps_domain() {
        let chain = vec![0x1000, PERF_CONTEXT_KERNEL, 0x2000, 0x2100];
        let decoded = decode(&chain, 0x1000);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].domain, ChainDomain::User);
        assert_eq!(decoded[0].pc, 0x1000);
        assert_eq!(decoded[1].domain, ChainDomain::Kernel);
        assert_eq!(decoded[2].domain, ChainDomain::Kernel);
    }

    #[test]
    fn repairs_missing_top_user_frame() {
        let chain = vec![0x2000, 0x3000];
        let decoded = decode(&chain, 0x1000);
        assert_eq!(decoded[0].pc, 0x1000);
        assert_eq!(decoded.len(), 3);
    }

    #[test]
    fn leaves_matching_top_frame_alone() {
        let chain = vec![0x1000, 0x2000];
        let decoded = decode(&chain, 0x1000);
        assert_eq!(decoded.len(), 2);
    }
}
