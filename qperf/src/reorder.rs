//! Re-orders decoded MMAP/MMAP2 and SAMPLE records into time order before
//! they reach the symbol table and unwinder.
//!
//! Grounded on `PerfUnwind::bufferEvent`/`flushEventBuffer`
//! (`perfunwind.cpp`): two lists carry their own record plus its decoded
//! time; `FINISHED_ROUND` is the safe flush point the kernel guarantees,
//! falling back to a size heuristic on older kernels that never emit it.

use qperf_data::{Attr, MmapRecord, Record, SampleRecord};

use crate::stats::Stats;

/// A buffered MMAP or MMAP2 region, flattened to the fields the flush
/// algorithm and the symbol table both need.
#[derive(Debug, Clone)]
pub struct BufferedMmap {
    pub time: u64,
    pub pid: i32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub filename: String,
    pub build_id: Option<Vec<u8>>,
    size: usize,
}

impl BufferedMmap {
    fn from_mmap(record: &MmapRecord) -> Self {
        let size = std::mem::size_of::<MmapRecord>() + record.filename.len();
        BufferedMmap {
            time: record.sample_id.time.unwrap_or(0),
            pid: record.pid as i32,
            addr: record.addr,
            len: record.len,
            pgoff: record.pgoff,
            filename: record.filename.clone(),
            build_id: None,
            size,
        }
    }

    /// Test-only constructor so other modules' tests can build a batch
    /// directly without going through a decoded `MmapRecord`.
    #[cfg(test)]
    pub fn for_test(time: u64, pid: i32, addr: u64, len: u64, filename: &str) -> Self {
        BufferedMmap {
            time,
            pid,
            addr,
            len,
            pgoff: 0,
            filename: filename.to_string(),
            build_id: None,
            size: 0,
        }
    }

    fn from_mmap2(record: &qperf_data::Mmap2Record) -> Self {
        let build_id = match &record.file_id {
            qperf_data::Mmap2FileId::BuildId(bytes) => Some(bytes.clone()),
            qperf_data::Mmap2FileId::InodeAndVersion { .. } => None,
        };
        let size = std::mem::size_of::<qperf_data::Mmap2Record>() + record.filename.len();
        BufferedMmap {
            time: record.sample_id.time.unwrap_or(0),
            pid: record.pid as i32,
            addr: record.addr,
            len: record.len,
            pgoff: record.pgoff,
            filename: record.filename.clone(),
            build_id,
            size,
        }
    }
}

/// A buffered SAMPLE, kept boxed since `SampleRecord` is already boxed by
/// the decoder.
#[derive(Debug, Clone)]
pub struct BufferedSample {
    pub time: u64,
    pub record: Box<SampleRecord>,
    /// The attribute that governed this sample, carried alongside it
    /// since two buffered samples can belong to different events.
    pub attr: Option<Attr>,
    size: usize,
}

impl BufferedSample {
    /// Test-only constructor mirroring `BufferedMmap::for_test`.
    #[cfg(test)]
    pub fn for_test(record: Box<SampleRecord>) -> Self {
        let time = record.time.unwrap_or(0);
        BufferedSample {
            time,
            record,
            attr: None,
            size: 0,
        }
    }
}

/// Result of a flush: the MMAPs and samples to apply, in the order the
/// driver must apply them (every MMAP with `time <= sample.time` before
/// that sample).
pub struct FlushBatch {
    pub mmaps: Vec<BufferedMmap>,
    pub samples: Vec<BufferedSample>,
    /// Hard `TimeOrderViolation`s detected at this flush: an MMAP whose
    /// time precedes the watermark left by the previous flush. The driver
    /// surfaces each as an `Error` frame but keeps streaming.
    pub time_order_violations: Vec<String>,
}

enum Mode {
    /// No `FINISHED_ROUND` seen yet: flush down to half of `max_bytes`
    /// whenever `buffered_bytes` exceeds it.
    Heuristic,
    /// At least one `FINISHED_ROUND` seen: the size heuristic is
    /// disabled and each round flushes half of what's buffered.
    Rounds,
}

/// The re-ordering buffer itself. Construct one per stream; feed it every
/// decoded `Record`, drain `FlushBatch`es as they become ready, and call
/// `finish` once the input is exhausted.
pub struct ReorderBuffer {
    mmaps: Vec<BufferedMmap>,
    samples: Vec<BufferedSample>,
    buffered_bytes: usize,
    last_flush_max_time: u64,
    max_bytes: usize,
    mode: Mode,
}

impl ReorderBuffer {
    /// `max_bytes == 0` disables the size heuristic outright (rounds-only
    /// mode from the start), matching `--buffer-size 0`.
    pub fn new(max_bytes: usize) -> Self {
        ReorderBuffer {
            mmaps: Vec::new(),
            samples: Vec::new(),
            buffered_bytes: 0,
            last_flush_max_time: 0,
            max_bytes,
            mode: if max_bytes == 0 {
                Mode::Rounds
            } else {
                Mode::Heuristic
            },
        }
    }

    /// Feeds one decoded record in. Returns a batch to apply immediately
    /// if this ingest crossed a flush threshold.
    pub fn ingest(&mut self, record: Record, attr: Option<Attr>, stats: &mut Stats) -> Option<FlushBatch> {
        match record {
            Record::Mmap(m) => {
                let buffered = BufferedMmap::from_mmap(&m);
                self.buffered_bytes += buffered.size;
                self.mmaps.push(buffered);
                stats.record_mmap();
            }
            Record::Mmap2(m) => {
                let buffered = BufferedMmap::from_mmap2(&m);
                self.buffered_bytes += buffered.size;
                self.mmaps.push(buffered);
                stats.record_mmap();
            }
            Record::Sample(s) => {
                let size = std::mem::size_of::<SampleRecord>() + s.raw.len() + s.user_stack.len();
                let time = s.time.unwrap_or(0);
                self.buffered_bytes += size;
                self.samples.push(BufferedSample {
                    time,
                    record: s,
                    attr,
                    size,
                });
                stats.record_sample(time);
            }
            Record::FinishedRound => {
                self.mode = Mode::Rounds;
                stats.finished_round();
                let half = self.buffered_bytes / 2;
                return self.flush(half, stats);
            }
            _ => {}
        }

        if let Mode::Heuristic = self.mode {
            if self.buffered_bytes > self.max_bytes {
                return self.flush(self.max_bytes / 2, stats);
            }
        }
        None
    }

    /// Flushes everything (`desired_bytes = 0`); call once at end of
    /// stream.
    pub fn finish(&mut self, stats: &mut Stats) -> FlushBatch {
        self.flush(0, stats).unwrap_or(FlushBatch {
            mmaps: Vec::new(),
            samples: Vec::new(),
            time_order_violations: Vec::new(),
        })
    }

    fn flush(&mut self, desired_bytes: usize, stats: &mut Stats) -> Option<FlushBatch> {
        if self.mmaps.is_empty() && self.samples.is_empty() {
            return None;
        }

        self.mmaps.sort_by_key(|m| m.time);
        self.samples.sort_by_key(|s| s.time);

        let mut time_order_violations = Vec::new();
        for mmap in &self.mmaps {
            if mmap.time < self.last_flush_max_time {
                stats.time_violating_mmap();
                let message = format!(
                    "MMAP for {} at time {} precedes the last flushed time {}",
                    mmap.filename, mmap.time, self.last_flush_max_time
                );
                log::error!("{message}");
                time_order_violations.push(message);
            }
        }

        let mut drained_mmaps = Vec::new();
        let mut drained_samples = Vec::new();
        let mut max_time_seen = self.last_flush_max_time;

        while self.buffered_bytes > desired_bytes && !self.samples.is_empty() {
            let sample = self.samples.remove(0);
            self.buffered_bytes -= sample.size;

            let split = self
                .mmaps
                .iter()
                .position(|m| m.time > sample.time)
                .unwrap_or(self.mmaps.len());
            for mmap in self.mmaps.drain(..split) {
                self.buffered_bytes -= mmap.size;
                drained_mmaps.push(mmap);
            }

            if sample.time < self.last_flush_max_time {
                stats.time_violating_sample();
                log::warn!(
                    "sample at time {} arrived after already-flushed time {}",
                    sample.time,
                    self.last_flush_max_time
                );
            }
            max_time_seen = max_time_seen.max(sample.time);
            drained_samples.push(sample);
        }

        // Any MMAPs strictly older than every remaining sample (or there are
        // no samples left at all) can drain too; they can no longer affect
        // ordering relative to what's left.
        if self.samples.is_empty() {
            for mmap in self.mmaps.drain(..) {
                self.buffered_bytes -= mmap.size;
                drained_mmaps.push(mmap);
            }
        }

        self.last_flush_max_time = max_time_seen;
        stats.buffer_flush(drained_mmaps.len(), drained_samples.len());

        if drained_mmaps.is_empty() && drained_samples.is_empty() && time_order_violations.is_empty() {
            return None;
        }
        Some(FlushBatch {
            mmaps: drained_mmaps,
            samples: drained_samples,
            time_order_violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qperf_data::SampleId;

    fn mmap_record(time: u64, pid: u32, addr: u64) -> Record {
        Record::Mmap(MmapRecord {
            pid,
            tid: pid,
            addr,
            len: 0x1000,
            pgoff: 0,
            filename: "/bin/x".to_string(),
            is_executable: true,
            cpu_mode: qperf_data::CpuMode::User,
            sample_id: SampleId {
                time: Some(time),
                ..Default::default()
            },
        })
    }

    fn sample_record(time: u64, ip: u64) -> Record {
        Record::Sample(Box::new(SampleRecord {
            ip: Some(ip),
            time: Some(time),
            pid: Some(7),
            tid: Some(7),
            ..Default::default()
        }))
    }

    #[test]
    fn flush_applies_late_arriving_mmap_before_its_later_sample() {
        let mut buffer = ReorderBuffer::new(1 << 20);
        let mut stats = Stats::new(true);
        assert!(buffer.ingest(sample_record(10, 0x1010), None, &mut stats).is_none());
        assert!(buffer.ingest(mmap_record(5, 7, 0x1000), None, &mut stats).is_none());

        let batch = buffer.finish(&mut stats);
        assert_eq!(batch.mmaps.len(), 1);
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.mmaps[0].addr, 0x1000);
        assert_eq!(batch.samples[0].record.ip, Some(0x1010));
    }

    #[test]
    fn finished_round_flushes_older_half_each_round() {
        let mut buffer = ReorderBuffer::new(1 << 20);
        let mut stats = Stats::new(true);
        for t in 0..100u64 {
            assert!(buffer.ingest(sample_record(t, 0), None, &mut stats).is_none());
        }
        let first_round = buffer
            .ingest(Record::FinishedRound, None, &mut stats)
            .expect("first round should flush");
        assert_eq!(first_round.samples.len(), 50);
        assert!(first_round.samples.iter().all(|s| s.time < 50));

        for t in 100..200u64 {
            assert!(buffer.ingest(sample_record(t, 0), None, &mut stats).is_none());
        }
        let second_round = buffer
            .ingest(Record::FinishedRound, None, &mut stats)
            .expect("second round should flush");
        assert_eq!(second_round.samples.len(), 75);

        let tail = buffer.finish(&mut stats);
        assert_eq!(tail.samples.len(), 75);
    }

    #[test]
    fn hard_error_surfaced_for_mmap_time_violation() {
        let mut buffer = ReorderBuffer::new(1 << 20);
        let mut stats = Stats::new(true);
        buffer.ingest(sample_record(10, 0), None, &mut stats);
        buffer.finish(&mut stats);

        // A second batch whose MMAP predates the watermark just flushed.
        buffer.ingest(mmap_record(1, 7, 0x2000), None, &mut stats);
        buffer.ingest(sample_record(20, 0), None, &mut stats);
        buffer.finish(&mut stats);
        assert_eq!(stats.num_time_violating_mmaps, 1);
    }
}
