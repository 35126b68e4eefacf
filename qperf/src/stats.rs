//! Run statistics, printed instead of the normal framed stream when
//! `--print-stats` is given.
//!
//! Grounded on `PerfUnwind::Stats` (`perfunwind.h`/`.cpp`): counters are
//! kept cheaply during the normal run and only rendered at the end, so
//! enabling `--print-stats` costs a few integer increments per event
//! rather than a second pass.

use std::fmt;

#[derive(Debug, Default)]
pub struct Stats {
    pub enabled: bool,

    pub num_samples: u64,
    pub num_mmaps: u64,
    pub num_rounds: u64,
    pub num_buffer_flushes: u64,
    pub num_time_violating_samples: u64,
    pub num_time_violating_mmaps: u64,

    samples_in_round: u64,
    mmaps_in_round: u64,
    pub max_samples_per_round: u64,
    pub max_mmaps_per_round: u64,

    pub max_samples_per_flush: u64,
    pub max_mmaps_per_flush: u64,

    pub max_time: u64,
    last_round_time: u64,
    pub max_time_between_rounds: u64,
}

impl Stats {
    pub fn new(enabled: bool) -> Self {
        Stats {
            enabled,
            ..Default::default()
        }
    }

    pub fn record_mmap(&mut self) {
        if !self.enabled {
            return;
        }
        self.num_mmaps += 1;
        self.mmaps_in_round += 1;
    }

    pub fn record_sample(&mut self, time: u64) {
        if !self.enabled {
            return;
        }
        self.num_samples += 1;
        self.samples_in_round += 1;
        self.max_time = self.max_time.max(time);
    }

    pub fn finished_round(&mut self) {
        if !self.enabled {
            return;
        }
        self.num_rounds += 1;
        self.max_samples_per_round = self.max_samples_per_round.max(self.samples_in_round);
        self.max_mmaps_per_round = self.max_mmaps_per_round.max(self.mmaps_in_round);
        self.samples_in_round = 0;
        self.mmaps_in_round = 0;
        if self.num_rounds > 1 {
            self.max_time_between_rounds = self
                .max_time_between_rounds
                .max(self.max_time.saturating_sub(self.last_round_time));
        }
        self.last_round_time = self.max_time;
    }

    pub fn buffer_flush(&mut self, mmaps: usize, samples: usize) {
        if !self.enabled {
            return;
        }
        self.num_buffer_flushes += 1;
        self.max_mmaps_per_flush = self.max_mmaps_per_flush.max(mmaps as u64);
        self.max_samples_per_flush = self.max_samples_per_flush.max(samples as u64);
    }

    pub fn time_violating_sample(&mut self) {
        if self.enabled {
            self.num_time_violating_samples += 1;
        }
    }

    pub fn time_violating_mmap(&mut self) {
        if self.enabled {
            self.num_time_violating_mmaps += 1;
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples: {}", self.num_samples)?;
        writeln!(f, "mmaps: {}", self.num_mmaps)?;
        writeln!(f, "rounds: {}", self.num_rounds)?;
        writeln!(f, "buffer flushes: {}", self.num_buffer_flushes)?;
        writeln!(f, "sample time violations: {}", self.num_time_violating_samples)?;
        writeln!(f, "mmap time violations: {}", self.num_time_violating_mmaps)?;
        writeln!(f, "max samples per round: {}", self.max_samples_per_round)?;
        writeln!(f, "max mmaps per round: {}", self.max_mmaps_per_round)?;
        writeln!(f, "max samples per flush: {}", self.max_samples_per_flush)?;
        writeln!(f, "max mmaps per flush: {}", self.max_mmaps_per_flush)?;
        writeln!(f, "max time: {}", self.max_time)?;
        writeln!(f, "max time between rounds: {}", self.max_time_between_rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stats_never_increment() {
        let mut stats = Stats::new(false);
        stats.record_sample(100);
        stats.record_mmap();
        assert_eq!(stats.num_samples, 0);
        assert_eq!(stats.num_mmaps, 0);
    }

    #[test]
    fn rounds_track_per_round_maxima() {
        let mut stats = Stats::new(true);
        stats.record_sample(1);
        stats.record_sample(2);
        stats.finished_round();
        stats.record_sample(3);
        stats.finished_round();
        assert_eq!(stats.num_rounds, 2);
        assert_eq!(stats.max_samples_per_round, 2);
    }
}
