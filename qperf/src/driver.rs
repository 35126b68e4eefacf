//! Wires the decoder, the reorder buffer, per-process symbol tables, the
//! unwinder and the output stream together. This is the pipeline `main`
//! drives: decode -> reorder -> resolve -> emit.
//!
//! Grounded on `PerfUnwind::analyze` (`perfunwind.cpp` lines 337-446): a
//! sample's frames come from the kernel-supplied call chain *and* a
//! DWARF unwind of the captured user stack, concatenated rather than
//! chosen between.

use std::collections::HashMap;
use std::io::Write;

use qperf_data::{Attr, Record};
use qperf_proto::{AttributeKey, ErrorCode, Features, LocationKey, StreamWriter};
use qperf_symbols::{Diagnostic, Location, ProcessSymbolTable, KERNEL_PID};
use qperf_unwind::{decode_callchain, Architecture, ChainDomain, DwarfUnwinder, RegisterFile};

use crate::config::Config;
use crate::debuginfo;
use crate::input::{Decoder, InputError, Source};
use crate::output::Sink;
use crate::reorder::{BufferedMmap, BufferedSample, FlushBatch, ReorderBuffer};
use crate::stats::Stats;

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Proto(#[from] qperf_proto::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Runs the whole pipeline to completion. In `--print-stats` mode the
/// normal unwind/symbolize work is skipped entirely (matching the
/// original's "don't do any time intensive work in stats mode") and the
/// accumulated counters are printed instead of the framed stream.
pub fn run(config: Config) -> Result<()> {
    let source = Source::open(&config)?;
    let mut decoder = Decoder::open(source)?;

    let mut stats = Stats::new(config.print_stats);
    let mut reorder = ReorderBuffer::new(config.buffer_size_bytes);
    let mut tables: HashMap<i32, ProcessSymbolTable> = HashMap::new();

    let sink = Sink::open(&config)?;
    let mut writer = StreamWriter::new(sink);
    writer.write_header()?;
    writer.emit_features(&Features::default())?;

    loop {
        let decoded = match decoder.next()? {
            Some(d) => d,
            None => break,
        };
        let attr = decoder.attribute_for(decoded.attr_index);

        match decoded.record {
            Record::Fork(rec) => {
                writer.emit_thread_start(rec.pid as i32, rec.tid as i32, rec.time)?;
            }
            Record::Exit(rec) => {
                writer.emit_thread_end(rec.pid as i32, rec.tid as i32, rec.time)?;
            }
            Record::Comm(rec) => {
                let comm_id = writer.intern_string(rec.name.as_bytes())?;
                let time = rec.sample_id.time.unwrap_or(0);
                writer.emit_command(rec.pid as i32, rec.tid as i32, time, comm_id)?;
            }
            Record::Lost(rec) => {
                let pid = rec.sample_id.pid.unwrap_or(0) as i32;
                let tid = rec.sample_id.tid.unwrap_or(0) as i32;
                let time = rec.sample_id.time.unwrap_or(0);
                writer.emit_lost(pid, tid, time)?;
            }
            record @ (Record::Mmap(_) | Record::Mmap2(_) | Record::Sample(_) | Record::FinishedRound) => {
                if let Some(batch) = reorder.ingest(record, attr, &mut stats) {
                    if !config.print_stats {
                        apply_batch(&config, &mut writer, &mut tables, batch)?;
                    }
                }
            }
            Record::AttrDefinition(_, _) | Record::Unknown { .. } => {}
        }
    }

    let tail = reorder.finish(&mut stats);
    if !config.print_stats {
        apply_batch(&config, &mut writer, &mut tables, tail)?;
        writer.emit_progress(1.0)?;
    } else {
        print!("{stats}");
    }

    Ok(())
}

fn apply_batch<W: Write>(
    config: &Config,
    writer: &mut StreamWriter<W>,
    tables: &mut HashMap<i32, ProcessSymbolTable>,
    batch: FlushBatch,
) -> Result<()> {
    for message in &batch.time_order_violations {
        writer.emit_error(ErrorCode::TimeOrderViolation, message)?;
    }
    for mmap in batch.mmaps {
        apply_mmap(config, writer, tables, mmap)?;
    }
    for sample in batch.samples {
        apply_sample(config, writer, tables, sample)?;
    }
    Ok(())
}

fn table_for<'a>(
    tables: &'a mut HashMap<i32, ProcessSymbolTable>,
    config: &Config,
    pid: i32,
) -> &'a mut ProcessSymbolTable {
    tables.entry(pid).or_insert_with(|| {
        if pid == KERNEL_PID {
            ProcessSymbolTable::new_kernel(config.kallsyms.as_deref().and_then(|p| p.to_str()))
        } else {
            ProcessSymbolTable::new(pid)
        }
    })
}

fn apply_mmap<W: Write>(
    config: &Config,
    writer: &mut StreamWriter<W>,
    tables: &mut HashMap<i32, ProcessSymbolTable>,
    mmap: BufferedMmap,
) -> Result<()> {
    let local_path = debuginfo::locate(config, &mmap.filename, mmap.build_id.as_deref());
    let local_str = local_path.as_deref().and_then(|p| p.to_str());

    let table = table_for(tables, config, mmap.pid);
    table.register_elf(
        mmap.addr,
        mmap.len,
        mmap.pgoff,
        mmap.time,
        &mmap.filename,
        local_str,
    );
    drain_diagnostics(writer, table)
}

/// Resolves and interns one call-chain or DWARF-unwound PC, consulting the
/// owning table's per-PID address cache first so an address already
/// resolved for this PID doesn't walk DWARF or re-emit definitions again.
fn resolve_and_intern<W: Write>(
    writer: &mut StreamWriter<W>,
    table: &mut ProcessSymbolTable,
    pid: i32,
    is_kernel: bool,
    pc: u64,
    time: u64,
) -> Result<Option<u32>> {
    if let Some(cached) = table.cached_location(pc, time) {
        return Ok(Some(cached.location_id));
    }
    let locations = table.resolve(pc, time);
    drain_diagnostics(writer, table)?;
    let id = intern_location_chain(writer, pid, is_kernel, locations)?;
    if let Some(id) = id {
        table.cache_location(pc, time, id);
    }
    Ok(id)
}

fn drain_diagnostics<W: Write>(writer: &mut StreamWriter<W>, table: &mut ProcessSymbolTable) -> Result<()> {
    for diagnostic in table.diagnostics.drain(..) {
        match diagnostic {
            Diagnostic::MissingElfFile { path } => {
                writer.emit_error(ErrorCode::MissingElfFile, &format!("missing ELF file {path}"))?;
            }
            Diagnostic::InvalidKallsyms { reason } => {
                writer.emit_error(ErrorCode::InvalidKallsyms, &reason)?;
            }
        }
    }
    Ok(())
}

fn apply_sample<W: Write>(
    config: &Config,
    writer: &mut StreamWriter<W>,
    tables: &mut HashMap<i32, ProcessSymbolTable>,
    sample: BufferedSample,
) -> Result<()> {
    let time = sample.time;
    let pid = sample.record.pid.unwrap_or(0) as i32;
    let tid = sample.record.tid.unwrap_or(0) as i32;
    let ip = sample.record.ip.unwrap_or(0);

    let mut frame_ids = Vec::new();

    if !sample.record.callchain.is_empty() {
        for entry in decode_callchain(&sample.record.callchain, ip) {
            let owner = match entry.domain {
                ChainDomain::User => pid,
                ChainDomain::Kernel | ChainDomain::Hypervisor => KERNEL_PID,
            };
            let table = table_for(tables, config, owner);
            let is_kernel = table.is_kernel();
            if let Some(id) = resolve_and_intern(writer, table, owner, is_kernel, entry.pc, time)? {
                frame_ids.push(id);
            }
        }
    }

    if let Some(abi) = sample.record.user_regs_abi {
        if abi != 0 && !sample.record.user_stack.is_empty() {
            if let Some(frames) = unwind_user_stack(config, tables, writer, &sample, pid, time)? {
                for frame in frames {
                    let table = table_for(tables, config, pid);
                    if let Some(id) = resolve_and_intern(writer, table, pid, false, frame, time)? {
                        frame_ids.push(id);
                    }
                }
            }
        }
    }

    let attribute_id = intern_sample_attribute(writer, sample.attr.as_ref())?;

    writer.emit_sample(
        pid,
        tid,
        time,
        &frame_ids,
        0, // stack-guessing (libdw-style) is not reimplemented.
        attribute_id,
        sample.record.period.unwrap_or(0),
        sample.record.weight.unwrap_or(0),
    )?;
    Ok(())
}

/// Runs the DWARF unwind for one sample's captured registers/stack, or
/// `None` if no `--arch` fallback was given (there is no per-sample
/// architecture hint in the data itself).
fn unwind_user_stack<W: Write>(
    config: &Config,
    tables: &mut HashMap<i32, ProcessSymbolTable>,
    writer: &mut StreamWriter<W>,
    sample: &BufferedSample,
    pid: i32,
    time: u64,
) -> Result<Option<Vec<u64>>> {
    let Some(arch_name) = config.arch.as_deref() else {
        return Ok(None);
    };
    let Some(architecture) = Architecture::from_name(arch_name) else {
        log::warn!("unrecognized --arch {arch_name}, skipping DWARF unwind");
        return Ok(None);
    };
    let arch_table = architecture.table();
    let captured_mask = sample.attr.as_ref().map(|a| a.sample_regs_user).unwrap_or(0);
    let registers = RegisterFile::from_perf_regs(
        arch_table,
        sample.record.user_regs_abi.unwrap_or(0),
        captured_mask,
        &sample.record.user_regs,
    );
    let stack_pointer = registers.get(arch_table.dwarf_sp).unwrap_or(0);

    let table = table_for(tables, config, pid);
    let mut unwinder = DwarfUnwinder::new(architecture, table, time);
    let result = unwinder.unwind_with_interworking_retry(
        sample.record.ip.unwrap_or(0),
        &registers,
        stack_pointer,
        &sample.record.user_stack,
        config.max_frames,
    );
    drain_diagnostics(writer, table_for(tables, config, pid))?;

    match result {
        Ok(frames) => Ok(Some(frames.into_iter().map(|f| f.pc).collect())),
        Err(err) => {
            log::warn!("dwarf unwind failed for pid {pid}: {err}");
            Ok(None)
        }
    }
}

/// Interns every location in a resolve() chain (innermost inlined frame
/// first, physical frame last), linking each to its enclosing frame via
/// `parent_location_id`, and returns the innermost id - the one the
/// sample's frame list actually references.
fn intern_location_chain<W: Write>(
    writer: &mut StreamWriter<W>,
    pid: i32,
    is_kernel: bool,
    locations: Vec<Location>,
) -> Result<Option<u32>> {
    let mut parent_id: Option<u32> = None;
    for location in locations.into_iter().rev() {
        let file_string_id = match &location.file {
            Some(file) => Some(writer.intern_string(file.as_bytes())?),
            None => None,
        };
        let key = LocationKey {
            address: location.address,
            file_string_id,
            pid,
            line: location.line.map(|l| l as i32).unwrap_or(-1),
            column: location.column.map(|c| c as i32).unwrap_or(-1),
            parent_location_id: parent_id,
        };
        let location_id = writer.intern_location(key)?;

        let name_string_id = match &location.function_name {
            Some(name) => Some(writer.intern_string(name.as_bytes())?),
            None => None,
        };
        let binary_string_id = match &location.binary_path {
            Some(path) => Some(writer.intern_string(path.as_bytes())?),
            None => None,
        };
        writer.emit_symbol(location_id, name_string_id, binary_string_id, is_kernel)?;

        parent_id = Some(location_id);
    }
    Ok(parent_id)
}

fn intern_sample_attribute<W: Write>(writer: &mut StreamWriter<W>, attr: Option<&Attr>) -> Result<u32> {
    let (attr_type, config, name) = match attr {
        Some(attr) => (attr.attr_type, attr.config, attr.name.clone()),
        None => (0, 0, None),
    };
    let name_string_id = match name {
        Some(name) => Some(writer.intern_string(name.as_bytes())?),
        None => None,
    };
    Ok(writer.intern_attribute(AttributeKey { attr_type, config }, name_string_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    fn test_config() -> Config {
        Config {
            input: None,
            output: None,
            host: None,
            port: None,
            sysroot: std::path::PathBuf::from("/"),
            debug_paths: Vec::new(),
            extra_paths: Vec::new(),
            app_path: None,
            kallsyms: None,
            arch: None,
            buffer_size_bytes: 1 << 20,
            max_frames: None,
            print_stats: false,
        }
    }

    fn mmap(time: u64, pid: i32, addr: u64, len: u64) -> BufferedMmap {
        BufferedMmap::for_test(time, pid, addr, len, "/bin/x")
    }

    fn sample(time: u64, pid: i32, ip: u64) -> BufferedSample {
        BufferedSample::for_test(Box::new(qperf_data::SampleRecord {
            ip: Some(ip),
            time: Some(time),
            pid: Some(pid as u32),
            tid: Some(pid as u32),
            ..Default::default()
        }))
    }

    /// Sample times in a sample tag frame's payload sit 8 bytes in (after
    /// the i32 pid and i32 tid fields).
    fn sample_times(bytes: &[u8]) -> Vec<u64> {
        let mut times = Vec::new();
        let mut offset = 0;
        while offset + 5 <= bytes.len() {
            let mut cursor = Cursor::new(&bytes[offset..offset + 4]);
            let length = cursor.read_u32::<LittleEndian>().unwrap() as usize;
            let tag = bytes[offset + 4];
            let payload_start = offset + 5;
            if tag == qperf_proto::MessageTag::Sample as u8 {
                let mut payload = Cursor::new(&bytes[payload_start + 8..payload_start + 16]);
                times.push(payload.read_u64::<LittleEndian>().unwrap());
            }
            offset = offset + 4 + length;
        }
        times
    }

    #[test]
    fn mmap_is_applied_to_elf_map_before_sample_is_resolved() {
        let config = test_config();
        let mut tables: HashMap<i32, ProcessSymbolTable> = HashMap::new();
        let mut writer = StreamWriter::new(Vec::new());

        let batch = FlushBatch {
            mmaps: vec![mmap(0, 7, 0x1000, 0x1000)],
            samples: vec![sample(10, 7, 0x1010)],
            time_order_violations: Vec::new(),
        };
        apply_batch(&config, &mut writer, &mut tables, batch).unwrap();

        let table = tables.get(&7).expect("pid 7 table created");
        assert!(table.is_address_mapped(0x1010, 10));
    }

    #[test]
    fn emitted_sample_times_stay_non_decreasing_across_batches() {
        let config = test_config();
        let mut tables: HashMap<i32, ProcessSymbolTable> = HashMap::new();
        let mut writer = StreamWriter::new(Vec::new());

        let first = FlushBatch {
            mmaps: vec![mmap(0, 7, 0x1000, 0x1000)],
            samples: vec![sample(5, 7, 0x1010), sample(10, 7, 0x1020)],
            time_order_violations: Vec::new(),
        };
        let second = FlushBatch {
            mmaps: Vec::new(),
            samples: vec![sample(10, 7, 0x1030), sample(20, 7, 0x1040)],
            time_order_violations: Vec::new(),
        };
        apply_batch(&config, &mut writer, &mut tables, first).unwrap();
        apply_batch(&config, &mut writer, &mut tables, second).unwrap();

        let bytes = writer.into_inner();
        let times = sample_times(&bytes);
        assert_eq!(times, vec![5, 10, 10, 20]);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn time_order_violation_is_surfaced_as_an_error_frame() {
        let config = test_config();
        let mut tables: HashMap<i32, ProcessSymbolTable> = HashMap::new();
        let mut writer = StreamWriter::new(Vec::new());

        let batch = FlushBatch {
            mmaps: Vec::new(),
            samples: Vec::new(),
            time_order_violations: vec!["mmap predates watermark".to_string()],
        };
        apply_batch(&config, &mut writer, &mut tables, batch).unwrap();

        let bytes = writer.into_inner();
        assert_eq!(bytes[4], qperf_proto::MessageTag::Error as u8);
    }
}
