// CLASSIFICATION: COMMUNITY
// Filename: stats.rs v0.4
// Author: Lukas Bower
// Date Modified: 2027-08-28

//! Per-sender and aggregate edit diagnostics.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::net::packet::SenderId;

/// Running counters for one edit sender (or the aggregate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub packets: u64,
    pub voxels: u64,
    pub transit_micros: u64,
    pub process_micros: u64,
    pub lock_wait_micros: u64,
}

impl SenderStats {
    fn record(&mut self, sample: &EditSample) {
        self.packets += 1;
        self.voxels += sample.voxels;
        self.transit_micros += sample.transit_micros;
        self.process_micros += sample.process_micros;
        self.lock_wait_micros += sample.lock_wait_micros;
    }

    pub fn avg_transit_per_packet(&self) -> u64 {
        self.transit_micros.checked_div(self.packets).unwrap_or(0)
    }

    pub fn avg_process_per_packet(&self) -> u64 {
        self.process_micros.checked_div(self.packets).unwrap_or(0)
    }

    pub fn avg_lock_wait_per_packet(&self) -> u64 {
        self.lock_wait_micros.checked_div(self.packets).unwrap_or(0)
    }

    pub fn avg_process_per_voxel(&self) -> u64 {
        self.process_micros.checked_div(self.voxels).unwrap_or(0)
    }

    pub fn avg_lock_wait_per_voxel(&self) -> u64 {
        self.lock_wait_micros.checked_div(self.voxels).unwrap_or(0)
    }
}

/// One processed packet's measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditSample {
    pub voxels: u64,
    pub transit_micros: u64,
    pub process_micros: u64,
    pub lock_wait_micros: u64,
}

/// Snapshot handed to the status layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EditStatsReport {
    pub aggregate: SenderStats,
    pub per_sender: Vec<(SenderId, SenderStats)>,
}

#[derive(Debug, Default)]
struct EditStatsInner {
    aggregate: SenderStats,
    per_sender: HashMap<SenderId, SenderStats>,
}

/// Shared counters, updated by the edit processor and read by the
/// status layer. Reset on demand from the status page.
#[derive(Debug, Default)]
pub struct EditStats {
    inner: Mutex<EditStatsInner>,
}

impl EditStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EditStatsInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record(&self, sender: SenderId, sample: EditSample) {
        let mut inner = self.lock();
        inner.aggregate.record(&sample);
        inner.per_sender.entry(sender).or_default().record(&sample);
    }

    pub fn report(&self) -> EditStatsReport {
        let inner = self.lock();
        let mut per_sender: Vec<_> = inner
            .per_sender
            .iter()
            .map(|(id, stats)| (*id, *stats))
            .collect();
        per_sender.sort_by_key(|(id, _)| *id);
        EditStatsReport { aggregate: inner.aggregate, per_sender }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.aggregate = SenderStats::default();
        inner.per_sender.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_and_per_sender_track_independently() {
        let stats = EditStats::new();
        let a = SenderId([1; 16]);
        let b = SenderId([2; 16]);
        stats.record(
            a,
            EditSample { voxels: 2, transit_micros: 100, process_micros: 10, lock_wait_micros: 4 },
        );
        stats.record(
            b,
            EditSample { voxels: 1, transit_micros: 50, process_micros: 20, lock_wait_micros: 6 },
        );
        let report = stats.report();
        assert_eq!(report.aggregate.packets, 2);
        assert_eq!(report.aggregate.voxels, 3);
        assert_eq!(report.aggregate.avg_transit_per_packet(), 75);
        assert_eq!(report.per_sender.len(), 2);
        let (_, a_stats) = report.per_sender.iter().find(|(id, _)| *id == a).unwrap();
        assert_eq!(a_stats.voxels, 2);
        assert_eq!(a_stats.avg_process_per_voxel(), 5);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = EditStats::new();
        stats.record(SenderId([9; 16]), EditSample { voxels: 1, ..Default::default() });
        stats.reset();
        let report = stats.report();
        assert_eq!(report.aggregate.packets, 0);
        assert!(report.per_sender.is_empty());
    }

    #[test]
    fn empty_stats_have_zero_averages() {
        let stats = SenderStats::default();
        assert_eq!(stats.avg_transit_per_packet(), 0);
        assert_eq!(stats.avg_lock_wait_per_voxel(), 0);
    }
}
