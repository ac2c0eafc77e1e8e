// CLASSIFICATION: COMMUNITY
// Filename: processor.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-08-28

//! Ordered worker applying inbound edit packets to the octree.
//!
//! The receive loop queues packets here so a burst of edits never
//! blocks inbound reads. Every per-packet failure is isolated: logged,
//! dropped, and the worker moves on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::edit::stats::{EditSample, EditStats};
use crate::net::packet::{self, EditHeader, PacketError, PacketType, VoxelEdit};
use crate::octree::{OctreeStore, VoxelPayload};

const QUEUE_POLL: Duration = Duration::from_millis(100);

/// One received datagram, tagged with sender address and arrival time.
#[derive(Debug)]
pub struct QueuedPacket {
    pub from: SocketAddr,
    pub data: Vec<u8>,
    pub received_at_micros: u64,
}

/// Background worker consuming the edit queue.
pub struct EditPacketProcessor {
    store: Arc<RwLock<OctreeStore>>,
    stats: Arc<EditStats>,
    shutdown: Arc<AtomicBool>,
}

impl EditPacketProcessor {
    pub fn new(
        store: Arc<RwLock<OctreeStore>>,
        stats: Arc<EditStats>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self { store, stats, shutdown }
    }

    /// Spawn the worker, returning the packet queue and its join handle.
    pub fn spawn(self) -> (Sender<QueuedPacket>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || self.run(rx));
        (tx, handle)
    }

    fn run(&self, queue: Receiver<QueuedPacket>) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match queue.recv_timeout(QUEUE_POLL) {
                Ok(pkt) => self.process(&pkt),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("edit packet processor exiting");
    }

    /// Process one queued packet, never letting an error escape.
    pub fn process(&self, pkt: &QueuedPacket) {
        match self.apply_packet(pkt) {
            Ok(_) => {}
            Err(PacketError::VersionMismatch { got }) => {
                // incompatible peer build, not worth a warning
                debug!("dropping edit packet from {} with protocol version {got}", pkt.from);
            }
            Err(e) => warn!("dropping malformed edit packet from {}: {e}", pkt.from),
        }
    }

    /// Decode and apply every edit in the packet, recording per-sender
    /// stats. Returns how many edits were applied.
    pub fn apply_packet(&self, pkt: &QueuedPacket) -> Result<u64, PacketError> {
        let started = Instant::now();
        let packet_type = packet::classify(&pkt.data)?;
        let (header, voxels, lock_wait) = match packet_type {
            PacketType::SetVoxel | PacketType::SetVoxelDestructive | PacketType::EraseVoxel => {
                let (header, edit) = packet::decode_single_edit(&pkt.data)?;
                let (applied, lock_wait) = self.apply_edits(std::iter::once(edit));
                (header, applied, lock_wait)
            }
            PacketType::ZCommand => {
                let (header, sub_edits) = packet::decode_z_command(&pkt.data)?;
                let mut batch = Vec::new();
                let mut failure = None;
                for sub_edit in sub_edits {
                    match sub_edit {
                        Ok(edit) => batch.push(edit),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                let (applied, lock_wait) = self.apply_edits(batch.into_iter());
                if let Some(e) = failure {
                    // prior sub-edits stay applied; the rest of the batch is gone
                    warn!(
                        "batch from {} aborted after {applied} edit(s): {e}",
                        pkt.from
                    );
                }
                (header, applied, lock_wait)
            }
            other => {
                debug!("edit processor ignoring {:?} packet from {}", other, pkt.from);
                return Ok(0);
            }
        };
        self.record(&header, pkt, started, voxels, lock_wait);
        Ok(voxels)
    }

    /// Apply edits one write-guard at a time so readers interleave.
    fn apply_edits(&self, edits: impl Iterator<Item = VoxelEdit>) -> (u64, Duration) {
        let mut applied = 0u64;
        let mut lock_wait = Duration::ZERO;
        for edit in edits {
            let wait_start = Instant::now();
            let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
            lock_wait += wait_start.elapsed();
            let payload = edit.color.map(|color| VoxelPayload { color });
            match store.apply_edit(&edit.code, payload, edit.mode) {
                Ok(()) => applied += 1,
                Err(e) => warn!("edit at {} rejected: {e}", edit.code),
            }
        }
        (applied, lock_wait)
    }

    fn record(
        &self,
        header: &EditHeader,
        pkt: &QueuedPacket,
        started: Instant,
        voxels: u64,
        lock_wait: Duration,
    ) {
        self.stats.record(
            header.sender,
            EditSample {
                voxels,
                transit_micros: pkt.received_at_micros.saturating_sub(header.sent_at_micros),
                process_micros: started.elapsed().as_micros() as u64,
                lock_wait_micros: lock_wait.as_micros() as u64,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet::{encode_single_edit, encode_z_command, SenderId, PROTOCOL_VERSION};
    use crate::octal::OctalCode;
    use crate::octree::EditMode;
    use crate::util::unix_micros;

    fn processor() -> (EditPacketProcessor, Arc<RwLock<OctreeStore>>, Arc<EditStats>) {
        let store = Arc::new(RwLock::new(OctreeStore::new()));
        let stats = Arc::new(EditStats::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        (
            EditPacketProcessor::new(store.clone(), stats.clone(), shutdown),
            store,
            stats,
        )
    }

    fn queued(data: Vec<u8>) -> QueuedPacket {
        QueuedPacket {
            from: "127.0.0.1:9999".parse().unwrap(),
            data,
            received_at_micros: unix_micros(),
        }
    }

    fn header(sender_byte: u8) -> EditHeader {
        EditHeader {
            sequence: 1,
            sent_at_micros: unix_micros(),
            sender: SenderId([sender_byte; 16]),
        }
    }

    fn set_edit(code: &str, r: u8) -> VoxelEdit {
        VoxelEdit {
            mode: EditMode::Set,
            code: OctalCode::parse(code).unwrap(),
            color: Some([r, 0, 0]),
        }
    }

    #[test]
    fn applies_a_single_set_edit_and_records_stats() {
        let (proc_, store, stats) = processor();
        let bytes = encode_single_edit(&header(1), &set_edit("24", 5));
        assert_eq!(proc_.apply_packet(&queued(bytes)).unwrap(), 1);
        let store = store.read().unwrap();
        assert_eq!(
            store.get(&OctalCode::parse("24").unwrap()).unwrap().payload().unwrap().color,
            [5, 0, 0]
        );
        let report = stats.report();
        assert_eq!(report.aggregate.packets, 1);
        assert_eq!(report.aggregate.voxels, 1);
        assert_eq!(report.per_sender.len(), 1);
    }

    #[test]
    fn batch_with_malformed_tail_keeps_prior_edits() {
        let (proc_, store, _) = processor();
        let edits = vec![set_edit("1", 1), set_edit("2", 2), set_edit("3", 3)];
        let mut bytes = encode_z_command(&header(2), &edits);
        bytes.push(0xFF); // bogus mode byte starts a malformed fourth record
        assert_eq!(proc_.apply_packet(&queued(bytes)).unwrap(), 3);
        let store = store.read().unwrap();
        for code in ["1", "2", "3"] {
            assert!(store.get(&OctalCode::parse(code).unwrap()).is_some(), "code {code}");
        }
        assert_eq!(store.counts().occupied, 3);
    }

    #[test]
    fn version_mismatch_is_dropped_silently() {
        let (proc_, store, stats) = processor();
        let mut bytes = encode_single_edit(&header(3), &set_edit("4", 4));
        bytes[1] = PROTOCOL_VERSION.wrapping_add(1);
        let pkt = queued(bytes);
        assert!(matches!(
            proc_.apply_packet(&pkt),
            Err(PacketError::VersionMismatch { .. })
        ));
        // the public entry point swallows it
        proc_.process(&pkt);
        assert_eq!(store.read().unwrap().counts().occupied, 0);
        assert_eq!(stats.report().aggregate.packets, 0);
    }

    #[test]
    fn truncated_packet_never_panics_the_worker() {
        let (proc_, _, _) = processor();
        let bytes = encode_single_edit(&header(4), &set_edit("123", 1));
        for cut in 0..bytes.len() {
            proc_.process(&queued(bytes[..cut].to_vec()));
        }
    }

    #[test]
    fn worker_thread_consumes_the_queue() {
        let store = Arc::new(RwLock::new(OctreeStore::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let proc_ = EditPacketProcessor::new(
            store.clone(),
            Arc::new(EditStats::new()),
            shutdown.clone(),
        );
        let (tx, handle) = proc_.spawn();
        tx.send(queued(encode_single_edit(&header(5), &set_edit("7", 7)))).unwrap();
        // the queue drains within a poll interval
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if store.read().unwrap().counts().occupied == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "edit never applied");
            thread::sleep(Duration::from_millis(10));
        }
        shutdown.store(true, Ordering::Relaxed);
        drop(tx);
        handle.join().unwrap();
    }
}
