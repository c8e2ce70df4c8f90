//! Named-section frame profiling.
//!
//! Measures wall-clock time spent in parts of the frame loop and keeps
//! per-section statistics over a rolling sample window. Sections are
//! timed either explicitly with [`begin_section`](FrameProfiler::begin_section)
//! / [`end_section`](FrameProfiler::end_section) or with the RAII
//! [`scope`](FrameProfiler::scope) guard.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::warn;

/// Samples kept per section for the rolling average.
const SAMPLE_HISTORY: usize = 100;

#[derive(Default)]
struct SectionStats {
    /// Recent sample times in milliseconds
    samples: VecDeque<f64>,
    /// Start of the currently open measurement, if any
    started: Option<Instant>,
    min_ms: f64,
    max_ms: f64,
    total_ms: f64,
    sample_count: u64,
}

impl SectionStats {
    fn record(&mut self, elapsed_ms: f64) {
        if self.sample_count == 0 || elapsed_ms < self.min_ms {
            self.min_ms = elapsed_ms;
        }
        if self.sample_count == 0 || elapsed_ms > self.max_ms {
            self.max_ms = elapsed_ms;
        }
        self.total_ms += elapsed_ms;
        self.sample_count += 1;

        if self.samples.len() == SAMPLE_HISTORY {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed_ms);
    }

    fn average_ms(&self) -> f64 {
        if !self.samples.is_empty() {
            return self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        }
        if self.sample_count > 0 {
            return self.total_ms / self.sample_count as f64;
        }
        0.0
    }
}

/// Per-section timing statistics for the frame loop.
///
/// One instance lives on the engine; subsystems share it by reference.
/// All operations take a single mutex, which is fine at the granularity
/// of a handful of sections per frame.
#[derive(Default)]
pub struct FrameProfiler {
    sections: Mutex<HashMap<String, SectionStats>>,
}

impl FrameProfiler {
    /// Create an empty profiler
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a section.
    ///
    /// Beginning a section that is already open is a bug in the caller;
    /// it is logged and the original start time kept.
    pub fn begin_section(&self, name: &str) {
        let mut sections = self.sections.lock();
        let section = sections.entry_ref(name).or_default();

        if section.started.is_some() {
            warn!(name, "profile section already active");
            return;
        }
        section.started = Some(Instant::now());
    }

    /// Stop timing a section and record the sample.
    pub fn end_section(&self, name: &str) {
        let mut sections = self.sections.lock();
        let Some(section) = sections.get_mut(name) else {
            warn!(name, "ending unknown profile section");
            return;
        };
        let Some(started) = section.started.take() else {
            warn!(name, "ending inactive profile section");
            return;
        };

        section.record(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Time a section for the lifetime of the returned guard.
    pub fn scope<'a>(&'a self, name: &str) -> ScopedSection<'a> {
        self.begin_section(name);
        ScopedSection {
            profiler: self,
            name: name.to_string(),
        }
    }

    /// Rolling average over the recent sample window, in milliseconds
    pub fn average_ms(&self, name: &str) -> f64 {
        self.sections
            .lock()
            .get(name)
            .map_or(0.0, SectionStats::average_ms)
    }

    /// Fastest sample recorded, in milliseconds
    pub fn min_ms(&self, name: &str) -> f64 {
        let sections = self.sections.lock();
        match sections.get(name) {
            Some(section) if section.sample_count > 0 => section.min_ms,
            _ => 0.0,
        }
    }

    /// Slowest sample recorded, in milliseconds
    pub fn max_ms(&self, name: &str) -> f64 {
        let sections = self.sections.lock();
        match sections.get(name) {
            Some(section) if section.sample_count > 0 => section.max_ms,
            _ => 0.0,
        }
    }

    /// Most recent sample, in milliseconds
    pub fn last_ms(&self, name: &str) -> f64 {
        self.sections
            .lock()
            .get(name)
            .and_then(|section| section.samples.back().copied())
            .unwrap_or(0.0)
    }

    /// Number of samples recorded for a section
    pub fn sample_count(&self, name: &str) -> u64 {
        self.sections
            .lock()
            .get(name)
            .map_or(0, |section| section.sample_count)
    }

    /// Discard all profiling data
    pub fn reset(&self) {
        self.sections.lock().clear();
    }

    /// Formatted per-section summary, slowest average first.
    pub fn report(&self) -> String {
        let sections = self.sections.lock();

        let mut report = String::from("Performance profile:\n");
        if sections.is_empty() {
            report.push_str("  no profiling data\n");
            return report;
        }

        let mut rows: Vec<(&String, &SectionStats)> = sections
            .iter()
            .filter(|(_, stats)| stats.sample_count > 0)
            .collect();
        rows.sort_by(|a, b| b.1.average_ms().total_cmp(&a.1.average_ms()));

        for (name, stats) in rows {
            let _ = writeln!(
                report,
                "  {:<25} | Avg: {:>8.3}ms | Min: {:>8.3}ms | Max: {:>8.3}ms | Samples: {}",
                name,
                stats.average_ms(),
                stats.min_ms,
                stats.max_ms,
                stats.sample_count
            );
        }
        report
    }
}

/// Times a section from creation until drop.
pub struct ScopedSection<'a> {
    profiler: &'a FrameProfiler,
    name: String,
}

impl Drop for ScopedSection<'_> {
    fn drop(&mut self) {
        self.profiler.end_section(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn begin_end_records_sample() {
        let profiler = FrameProfiler::new();

        profiler.begin_section("tick");
        std::thread::sleep(Duration::from_millis(2));
        profiler.end_section("tick");

        assert_eq!(profiler.sample_count("tick"), 1);
        assert!(profiler.last_ms("tick") >= 1.0);
        assert!(profiler.min_ms("tick") <= profiler.max_ms("tick"));
    }

    #[test]
    fn scope_guard_records_on_drop() {
        let profiler = FrameProfiler::new();

        {
            let _section = profiler.scope("mesh");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(profiler.sample_count("mesh"), 1);
    }

    #[test]
    fn stats_track_min_max_average() {
        let profiler = FrameProfiler::new();

        for sleep_ms in [1u64, 3, 2] {
            profiler.begin_section("varied");
            std::thread::sleep(Duration::from_millis(sleep_ms));
            profiler.end_section("varied");
        }

        assert_eq!(profiler.sample_count("varied"), 3);
        let min = profiler.min_ms("varied");
        let avg = profiler.average_ms("varied");
        let max = profiler.max_ms("varied");
        assert!(min <= avg && avg <= max);
        assert!(max >= 3.0);
    }

    #[test]
    fn unbalanced_calls_record_nothing() {
        let profiler = FrameProfiler::new();

        profiler.end_section("never_started");
        assert_eq!(profiler.sample_count("never_started"), 0);

        // A second begin keeps the first measurement open
        profiler.begin_section("doubled");
        profiler.begin_section("doubled");
        profiler.end_section("doubled");
        assert_eq!(profiler.sample_count("doubled"), 1);
        profiler.end_section("doubled");
        assert_eq!(profiler.sample_count("doubled"), 1);
    }

    #[test]
    fn unknown_section_reads_zero() {
        let profiler = FrameProfiler::new();
        assert_eq!(profiler.average_ms("nothing"), 0.0);
        assert_eq!(profiler.min_ms("nothing"), 0.0);
        assert_eq!(profiler.max_ms("nothing"), 0.0);
        assert_eq!(profiler.sample_count("nothing"), 0);
    }

    #[test]
    fn report_lists_sections() {
        let profiler = FrameProfiler::new();

        let empty = profiler.report();
        assert!(empty.contains("no profiling data"));

        profiler.begin_section("aggregate");
        profiler.end_section("aggregate");

        let report = profiler.report();
        assert!(report.contains("aggregate"));
        assert!(report.contains("Samples: 1"));
    }

    #[test]
    fn reset_discards_everything() {
        let profiler = FrameProfiler::new();
        profiler.begin_section("tick");
        profiler.end_section("tick");

        profiler.reset();

        assert_eq!(profiler.sample_count("tick"), 0);
        assert!(profiler.report().contains("no profiling data"));
    }
}
