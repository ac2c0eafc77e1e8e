// CLASSIFICATION: COMMUNITY
// Filename: octree_replay.rs v0.2
// Author: Lukas Bower
// Date Modified: 2027-08-29

use std::fs;

use tempfile::tempdir;

use voxeld::octal::OctalCode;
use voxeld::octree::codec::{decode_snapshot, encode_snapshot};
use voxeld::octree::{EditMode, OctreeStore, VoxelPayload};

/// Small deterministic generator so both stores see the same edits.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn code(&mut self) -> OctalCode {
        let depth = 1 + (self.next() % 6) as usize;
        let selectors: Vec<u8> = (0..depth).map(|_| (self.next() % 8) as u8).collect();
        OctalCode::from_selectors(&selectors).unwrap()
    }

    fn color(&mut self) -> [u8; 3] {
        [
            self.next() as u8,
            self.next() as u8,
            self.next() as u8,
        ]
    }
}

fn apply_random_edits(store: &mut OctreeStore, seed: u64, count: usize) {
    let mut rng = Lcg(seed);
    for _ in 0..count {
        let code = rng.code();
        let roll = rng.next() % 10;
        let color = rng.color();
        let (payload, mode) = match roll {
            0 => (None, EditMode::Erase),
            1 => (Some(VoxelPayload { color }), EditMode::SetDestructive),
            _ => (Some(VoxelPayload { color }), EditMode::Set),
        };
        // Erase of an absent code is a no-op, never an error.
        store.apply_edit(&code, payload, mode).unwrap();
    }
}

#[test]
fn identical_edit_streams_converge() {
    let mut a = OctreeStore::new();
    let mut b = OctreeStore::new();
    apply_random_edits(&mut a, 0x5eed, 500);
    apply_random_edits(&mut b, 0x5eed, 500);

    let records_a = a.records();
    let records_b = b.records();
    assert!(!records_a.is_empty());
    assert_eq!(records_a.len(), records_b.len());
    for (ra, rb) in records_a.iter().zip(&records_b) {
        assert_eq!(ra.code, rb.code);
        assert_eq!(ra.color, rb.color);
    }
}

#[test]
fn snapshot_round_trip_preserves_occupancy() {
    let mut store = OctreeStore::new();
    apply_random_edits(&mut store, 0xface, 300);
    let before = store.records();

    let bytes = encode_snapshot(&store);
    let decoded = decode_snapshot(&bytes).unwrap();
    let mut restored = OctreeStore::new();
    restored.load_records(&decoded);
    let after = restored.records();

    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.code, a.code);
        assert_eq!(b.color, a.color);
    }
    // Occupancy matches even though revisions restart from scratch.
    assert_eq!(store.counts().occupied, restored.counts().occupied);
}

#[test]
fn snapshot_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("voxels.vxs");

    let mut store = OctreeStore::new();
    apply_random_edits(&mut store, 42, 200);
    let mut file = fs::File::create(&path).unwrap();
    store.serialize_to(&mut file).unwrap();
    drop(file);

    let mut restored = OctreeStore::new();
    restored.load_from_file(&path).unwrap();
    assert_eq!(store.records().len(), restored.records().len());
    assert!(!restored.has_unsaved_changes());
}

#[test]
fn erase_replay_prunes_everything() {
    let mut store = OctreeStore::new();
    let mut codes = Vec::new();
    let mut rng = Lcg(7);
    for _ in 0..50 {
        let code = rng.code();
        let color = rng.color();
        store
            .apply_edit(&code, Some(VoxelPayload { color }), EditMode::Set)
            .unwrap();
        codes.push(code);
    }
    for code in &codes {
        store.apply_edit(code, None, EditMode::Erase).unwrap();
    }
    assert_eq!(store.counts().occupied, 0);
    // The root survives erasure; nothing else does.
    assert_eq!(store.counts().total, 1);
}
