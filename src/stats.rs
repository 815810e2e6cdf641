//! Collection statistics.
//!
//! Cheap counters (collection counts, pause totals, copied bytes) are always
//! maintained; per-operation counters that would tax the mutator fast path
//! sit behind the `expensive-stats` feature. The snapshot serializes with
//! serde so embedders can ship reports to whatever telemetry they run.

use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;

use crate::collect::CollectionKind;

/// Per-collection-kind event counters.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct KindCounters {
    pub minor: u64,
    pub major: u64,
    pub global: u64,
    pub share: u64,
}

impl KindCounters {
    pub(crate) fn bump(&mut self, kind: CollectionKind) {
        match kind {
            CollectionKind::Minor => self.minor += 1,
            CollectionKind::Major => self.major += 1,
            CollectionKind::Global => self.global += 1,
            CollectionKind::Share => self.share += 1,
            CollectionKind::SsbFlush => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.minor + self.major + self.global + self.share
    }
}

/// Statistics accumulated over a heaplet's lifetime.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Statistics {
    /// Collections performed, by kind.
    pub collections: KindCounters,
    /// Bytes copied by the scan engine, all kinds.
    pub bytes_copied: u64,
    /// Bytes copied out of young fromspaces.
    pub bytes_copied_young: u64,
    /// Total stop-the-world pause time.
    pub pause_total: Duration,
    /// Longest single pause.
    pub pause_max: Duration,
    /// SSB overflow/explicit flushes.
    pub ssb_flushes: u64,
    /// Entries drained across all flushes.
    pub ssb_flushed_entries: u64,
    /// Remembered-set size at the start of the latest collection.
    pub remembered_set_size: usize,
    /// High-water mark of the remembered set.
    pub remembered_set_peak: usize,
    /// Latest weighted minor survival estimate, if any.
    pub minor_survival_estimate: Option<f64>,
    /// Latest weighted major survival estimate, if any.
    pub major_survival_estimate: Option<f64>,
    /// Per-registered-shape copy counts, index-aligned with the shape table.
    #[cfg(feature = "expensive-stats")]
    pub copies_per_shape: Vec<u64>,
    /// Longest SSB queue observed at flush time.
    #[cfg(feature = "expensive-stats")]
    pub ssb_queue_peak: usize,
}

impl Statistics {
    pub(crate) fn record_pause(&mut self, pause: Duration) {
        self.pause_total += pause;
        if pause > self.pause_max {
            self.pause_max = pause;
        }
    }

    pub(crate) fn record_flush(&mut self, drained: usize) {
        self.ssb_flushes += 1;
        self.ssb_flushed_entries += drained as u64;
        #[cfg(feature = "expensive-stats")]
        {
            if drained > self.ssb_queue_peak {
                self.ssb_queue_peak = drained;
            }
        }
    }

    pub(crate) fn record_remembered_set(&mut self, size: usize) {
        self.remembered_set_size = size;
        if size > self.remembered_set_peak {
            self.remembered_set_peak = size;
        }
    }

    /// Writes a human-readable report.
    pub fn print<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "collections: {} minor, {} major, {} global, {} share",
            self.collections.minor, self.collections.major,
            self.collections.global, self.collections.share)?;
        writeln!(out, "bytes copied: {} ({} from young)", self.bytes_copied, self.bytes_copied_young)?;
        writeln!(out, "pauses: total {:?}, max {:?}", self.pause_total, self.pause_max)?;
        writeln!(out, "ssb: {} flushes, {} entries", self.ssb_flushes, self.ssb_flushed_entries)?;
        writeln!(out, "remembered set: {} entries (peak {})",
            self.remembered_set_size, self.remembered_set_peak)?;
        if let Some(rate) = self.minor_survival_estimate {
            writeln!(out, "minor survival estimate: {rate:.3}")?;
        }
        if let Some(rate) = self.major_survival_estimate {
            writeln!(out, "major survival estimate: {rate:.3}")?;
        }
        Ok(())
    }

    /// Writes the snapshot as JSON.
    pub fn dump_json<W: Write>(&self, out: &mut W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self).map_err(io::Error::from)?;
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_max_tracks_longest() {
        let mut stats = Statistics::default();
        stats.record_pause(Duration::from_micros(30));
        stats.record_pause(Duration::from_micros(10));
        assert_eq!(stats.pause_total, Duration::from_micros(40));
        assert_eq!(stats.pause_max, Duration::from_micros(30));
    }

    #[test]
    fn reports_serialize() {
        let mut stats = Statistics::default();
        stats.collections.bump(CollectionKind::Minor);
        stats.record_flush(7);
        let mut text = Vec::new();
        stats.print(&mut text).unwrap();
        assert!(String::from_utf8(text).unwrap().contains("1 minor"));
        let mut json = Vec::new();
        stats.dump_json(&mut json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["ssb_flushes"], 1);
        assert_eq!(value["ssb_flushed_entries"], 7);
        assert_eq!(value["collections"]["minor"], 1);
    }
}
