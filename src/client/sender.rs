// CLASSIFICATION: COMMUNITY
// Filename: sender.rs v0.7
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Per-client send worker: view-prioritized, rate-limited streaming.
//!
//! Each tick scans the octree for records changed since the last scan,
//! orders them so coarse and near detail goes first, and transmits at
//! most the per-interval packet budget. Leftovers stay queued and are
//! drained before the next scan, so distant regions are never starved,
//! and a node is never retransmitted unless it changed after the scan
//! that last covered it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::client::{SessionState, SharedSession, ViewParams};
use crate::config::EnvironmentConfig;
use crate::net::packet::{self, EnvironmentRecord, MAX_PACKET_SIZE, VOXEL_DATA_HEADER_LEN};
use crate::net::VoxelSocket;
use crate::octal::OctalCode;
use crate::octree::{OctreeStore, VoxelRecord};

/// Send worker state for one client.
pub struct ClientSender {
    session: SharedSession,
    store: Arc<RwLock<OctreeStore>>,
    socket: VoxelSocket,
    send_interval: Duration,
    packets_per_interval: usize,
    environment: EnvironmentConfig,
    shutdown: Arc<AtomicBool>,
    /// Changed codes awaiting transmission, highest priority first.
    pending: VecDeque<OctalCode>,
    /// Store revision covered by the last scan.
    last_scan_revision: u64,
    last_environment_at: Option<Instant>,
}

/// Cadence of environment-data packets when broadcasting is on.
const ENVIRONMENT_SEND_INTERVAL: Duration = Duration::from_secs(1);

impl ClientSender {
    pub fn new(
        session: SharedSession,
        store: Arc<RwLock<OctreeStore>>,
        socket: VoxelSocket,
        send_interval: Duration,
        packets_per_interval: usize,
        environment: EnvironmentConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            store,
            socket,
            send_interval,
            packets_per_interval: packets_per_interval.max(1),
            environment,
            shutdown,
            pending: VecDeque::new(),
            last_scan_revision: 0,
            last_environment_at: None,
        }
    }

    /// Spawn the worker thread. It exits when the session is removed or
    /// the server shuts down.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(&mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let state = self
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state;
            match state {
                SessionState::Removed => break,
                SessionState::Active => {
                    self.tick();
                }
                SessionState::Silent => {}
            }
            thread::sleep(self.send_interval);
        }
        debug!("send worker exiting");
    }

    /// One scheduling interval. Returns the number of packets sent.
    pub fn tick(&mut self) -> usize {
        let (addr, view) = {
            let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            (session.addr, session.view)
        };
        let Some(view) = view else { return 0 };

        self.send_environment(addr);

        if self.pending.is_empty() {
            self.scan(&view);
        }

        let mut packets_sent = 0;
        while packets_sent < self.packets_per_interval && !self.pending.is_empty() {
            let records = self.fill_packet();
            if records.is_empty() {
                break;
            }
            let sequence = self
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next_sequence();
            let bytes = packet::encode_voxel_data(sequence, self.last_scan_revision, &records);
            if let Err(e) = self.socket.send_to(&bytes, addr) {
                warn!("voxel data send to {addr} failed: {e}");
                break;
            }
            packets_sent += 1;
        }
        packets_sent
    }

    /// Environment data rides outside the voxel packet budget, at most
    /// once per [`ENVIRONMENT_SEND_INTERVAL`].
    fn send_environment(&mut self, addr: std::net::SocketAddr) {
        if !self.environment.broadcast {
            return;
        }
        let due = self
            .last_environment_at
            .map_or(true, |at| at.elapsed() >= ENVIRONMENT_SEND_INTERVAL);
        if !due {
            return;
        }
        self.last_environment_at = Some(Instant::now());
        let records = EnvironmentRecord::broadcast_set(self.environment.minimal);
        if let Err(e) = self.socket.send_to(&packet::encode_environment_data(&records), addr) {
            warn!("environment send to {addr} failed: {e}");
        }
    }

    /// Refill the pending queue with records changed since the last
    /// scan, ordered by the coarse-and-near-first heuristic.
    fn scan(&mut self, view: &ViewParams) {
        let (scan_revision, mut changed) = {
            let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
            (store.revision(), store.changed_since(self.last_scan_revision))
        };
        if changed.is_empty() {
            self.last_scan_revision = scan_revision;
            return;
        }
        changed.sort_by(|a, b| {
            priority_key(a, view)
                .partial_cmp(&priority_key(b, view))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.pending.extend(changed.into_iter().map(|r| r.code));
        self.last_scan_revision = scan_revision;
    }

    /// Pop pending codes into one packet's worth of fresh records,
    /// re-reading payloads so the wire always carries current state.
    fn fill_packet(&mut self) -> Vec<VoxelRecord> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let mut records = Vec::new();
        let mut size = VOXEL_DATA_HEADER_LEN;
        while let Some(code) = self.pending.front() {
            let Some(payload) = store.get(code).and_then(|node| node.payload().copied()) else {
                // erased while queued
                self.pending.pop_front();
                continue;
            };
            let record = VoxelRecord {
                code: code.clone(),
                color: payload.color,
                revision: 0,
            };
            let wire = packet::record_wire_len(&record);
            if size + wire > MAX_PACKET_SIZE {
                break;
            }
            size += wire;
            records.push(record);
            self.pending.pop_front();
        }
        records
    }
}

/// Sort key: shallower (larger) cells first, then nearer the viewpoint.
fn priority_key(record: &VoxelRecord, view: &ViewParams) -> (usize, f32) {
    let center = record.code.bounds().center_world();
    let dx = center[0] - view.position[0];
    let dy = center[1] - view.position[1];
    let dz = center[2] - view.position[2];
    (record.code.depth(), dx * dx + dy * dy + dz * dz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionTable;
    use crate::net::packet::{decode_voxel_data, SenderId, VoxelQuery};
    use crate::octree::{EditMode, VoxelPayload};
    use std::time::Instant;

    fn set(store: &RwLock<OctreeStore>, code: &str, r: u8) {
        store
            .write()
            .unwrap()
            .apply_edit(
                &OctalCode::parse(code).unwrap(),
                Some(VoxelPayload { color: [r, 0, 0] }),
                EditMode::Set,
            )
            .unwrap();
    }

    struct Rig {
        sender: ClientSender,
        client: VoxelSocket,
        store: Arc<RwLock<OctreeStore>>,
    }

    fn rig(packets_per_interval: usize, position: [f32; 3]) -> Rig {
        rig_with_environment(packets_per_interval, position, EnvironmentConfig::default())
    }

    fn rig_with_environment(
        packets_per_interval: usize,
        position: [f32; 3],
        environment: EnvironmentConfig,
    ) -> Rig {
        let store = Arc::new(RwLock::new(OctreeStore::new()));
        let server = VoxelSocket::bind("127.0.0.1:0", Duration::from_millis(100)).unwrap();
        let client = VoxelSocket::bind("127.0.0.1:0", Duration::from_millis(500)).unwrap();
        let table = SessionTable::new();
        let query = VoxelQuery {
            client: SenderId([7; 16]),
            position,
            orientation: [0.0; 3],
            fov: 60.0,
            last_sequence: 0,
        };
        let (session, _) = table.record_query(client.local_addr().unwrap(), &query, Instant::now());
        let sender = ClientSender::new(
            session,
            store.clone(),
            server,
            Duration::from_millis(10),
            packets_per_interval,
            environment,
            Arc::new(AtomicBool::new(false)),
        );
        Rig { sender, client, store }
    }

    fn recv_codes(client: &VoxelSocket) -> Vec<String> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut codes = Vec::new();
        while let Some((len, _)) = client.recv_timeout(&mut buf).unwrap() {
            let (_, _, records) = decode_voxel_data(&buf[..len]).unwrap();
            codes.extend(records.into_iter().map(|(code, _)| code.to_string()));
        }
        codes
    }

    #[test]
    fn sends_changed_nodes_once_and_only_resends_after_a_change() {
        let mut rig = rig(8, [0.0; 3]);
        set(&rig.store, "24", 1);
        set(&rig.store, "7", 2);
        assert_eq!(rig.sender.tick(), 1);
        let codes = recv_codes(&rig.client);
        assert_eq!(codes.len(), 2);

        // nothing changed: nothing goes out
        assert_eq!(rig.sender.tick(), 0);
        assert!(recv_codes(&rig.client).is_empty());

        // an edit re-dirties one node only
        set(&rig.store, "7", 3);
        assert_eq!(rig.sender.tick(), 1);
        assert_eq!(recv_codes(&rig.client), vec!["7".to_string()]);
    }

    #[test]
    fn occupied_ancestor_is_not_resent_when_only_a_descendant_changes() {
        let mut rig = rig(8, [0.0; 3]);
        set(&rig.store, "2", 1);
        set(&rig.store, "24", 2);
        assert_eq!(rig.sender.tick(), 1);
        let first = recv_codes(&rig.client);
        assert!(first.contains(&"2".to_string()));
        assert!(first.contains(&"24".to_string()));

        set(&rig.store, "24", 3);
        assert_eq!(rig.sender.tick(), 1);
        assert_eq!(recv_codes(&rig.client), vec!["24".to_string()]);
    }

    #[test]
    fn environment_packets_ride_outside_the_voxel_budget() {
        use crate::net::packet::{classify, decode_environment_data, PacketType};
        let mut rig = rig_with_environment(
            1,
            [0.0; 3],
            EnvironmentConfig { broadcast: true, minimal: true },
        );
        set(&rig.store, "24", 1);
        // the budget of one voxel packet still leaves room for environment data
        assert_eq!(rig.sender.tick(), 1);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut environments = Vec::new();
        let mut voxel_packets = 0;
        while let Some((len, _)) = rig.client.recv_timeout(&mut buf).unwrap() {
            match classify(&buf[..len]).unwrap() {
                PacketType::EnvironmentData => {
                    environments = decode_environment_data(&buf[..len]).unwrap();
                }
                PacketType::VoxelData => voxel_packets += 1,
                other => panic!("unexpected packet type {other:?}"),
            }
        }
        assert_eq!(voxel_packets, 1);
        assert_eq!(environments, vec![EnvironmentRecord::default_global()]);

        // within the cadence window only voxel traffic goes out
        set(&rig.store, "24", 2);
        rig.sender.tick();
        while let Some((len, _)) = rig.client.recv_timeout(&mut buf).unwrap() {
            assert_eq!(classify(&buf[..len]).unwrap(), PacketType::VoxelData);
        }
    }

    #[test]
    fn environment_broadcast_off_sends_no_environment_packets() {
        use crate::net::packet::{classify, PacketType};
        let mut rig = rig(8, [0.0; 3]);
        set(&rig.store, "24", 1);
        rig.sender.tick();
        let mut buf = [0u8; MAX_PACKET_SIZE];
        while let Some((len, _)) = rig.client.recv_timeout(&mut buf).unwrap() {
            assert_eq!(classify(&buf[..len]).unwrap(), PacketType::VoxelData);
        }
    }

    #[test]
    fn coarse_and_near_detail_goes_first() {
        let mut rig = rig(8, [0.0; 3]);
        set(&rig.store, "770", 1); // fine, far corner
        set(&rig.store, "0", 2); // coarse, near origin
        set(&rig.store, "7", 3); // coarse, far corner
        rig.sender.tick();
        let codes = recv_codes(&rig.client);
        assert_eq!(codes, vec!["0".to_string(), "7".to_string(), "770".to_string()]);
    }

    #[test]
    fn packet_budget_defers_but_never_starves() {
        let mut rig = rig(1, [0.0; 3]);
        // enough records to overflow one packet
        let mut expected = 0;
        for a in 0..8u8 {
            for b in 0..8u8 {
                for c in 0..8u8 {
                    set(&rig.store, &format!("{a}{b}{c}"), a + 1);
                    expected += 1;
                }
            }
        }
        let mut received = 0;
        let mut ticks = 0;
        while received < expected {
            ticks += 1;
            assert!(ticks < 64, "scheduler stopped making progress");
            let sent = rig.sender.tick();
            assert!(sent <= 1);
            received += recv_codes(&rig.client).len();
        }
        assert_eq!(received, expected);
        // everything delivered; the queue is quiet again
        assert_eq!(rig.sender.tick(), 0);
    }

    #[test]
    fn erased_while_queued_is_skipped() {
        let mut rig = rig(1, [0.0; 3]);
        set(&rig.store, "1", 1);
        set(&rig.store, "2", 2);
        // scan fills the queue, then one record disappears
        rig.sender.scan(&ViewParams { position: [0.0; 3], orientation: [0.0; 3], fov: 60.0 });
        rig.store
            .write()
            .unwrap()
            .apply_edit(&OctalCode::parse("1").unwrap(), None, EditMode::Erase)
            .unwrap();
        rig.sender.tick();
        let codes = recv_codes(&rig.client);
        assert!(codes.contains(&"2".to_string()));
        assert!(!codes.contains(&"1".to_string()));
    }
}
