// CLASSIFICATION: COMMUNITY
// Filename: store.rs v0.6
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Authoritative in-memory octree of voxel occupancy.
//!
//! The store is shared as `Arc<RwLock<OctreeStore>>`: one edit per write
//! guard, traversals under read guards, so a traversal observes each
//! node fully-old or fully-new and never half-applied.

use std::mem;

use serde::Serialize;
use thiserror::Error;

use crate::octal::OctalCode;
use crate::octree::node::{OctreeNode, VoxelPayload};

/// How an edit mutates the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Create or update the addressed node and its ancestors; siblings
    /// and descendants are untouched.
    Set,
    /// As [`EditMode::Set`], but first delete every existing descendant
    /// of the addressed node. The coarse write wins over finer detail.
    SetDestructive,
    /// Remove occupancy at the address and prune empty subtrees upward.
    Erase,
}

/// Errors from applying a single edit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("set edit carries no payload")]
    MissingPayload,
}

/// Node tallies for the status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeCounts {
    pub total: u64,
    pub internal: u64,
    pub leaves: u64,
    pub occupied: u64,
}

/// Rough heap usage by category, for the status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub node_bytes: u64,
    pub payload_bytes: u64,
    /// Wire-form address bytes of every occupied cell, the footprint the
    /// codes take in a snapshot.
    pub code_bytes: u64,
}

impl MemoryUsage {
    pub fn total_bytes(&self) -> u64 {
        self.node_bytes + self.payload_bytes + self.code_bytes
    }
}

/// One occupancy-bearing node, as surfaced to senders and the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelRecord {
    pub code: OctalCode,
    pub color: [u8; 3],
    pub revision: u64,
}

/// The authoritative octree. Owns the root node for the server lifetime.
#[derive(Debug, Default)]
pub struct OctreeStore {
    root: OctreeNode,
    revision: u64,
    unsaved: bool,
}

impl OctreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped by every edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True when the tree changed since the last persisted snapshot.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    /// Clear the unsaved flag, but only if no edit landed after the
    /// snapshot taken at `snapshot_revision` was written out.
    pub fn mark_saved(&mut self, snapshot_revision: u64) {
        if self.revision == snapshot_revision {
            self.unsaved = false;
        }
    }

    /// Apply one edit. Set modes require a payload; erase ignores it and
    /// is a no-op when the address holds nothing.
    pub fn apply_edit(
        &mut self,
        code: &OctalCode,
        payload: Option<VoxelPayload>,
        mode: EditMode,
    ) -> Result<(), EditError> {
        self.revision += 1;
        let rev = self.revision;
        match mode {
            EditMode::Set | EditMode::SetDestructive => {
                let payload = payload.ok_or(EditError::MissingPayload)?;
                let mut node = &mut self.root;
                node.stamp(rev);
                for &octant in code.selectors() {
                    node = node.child_or_insert(octant);
                    node.stamp(rev);
                }
                if mode == EditMode::SetDestructive {
                    node.clear_children();
                }
                node.set_payload(payload);
                node.stamp_payload(rev);
            }
            EditMode::Erase => {
                erase_recursive(&mut self.root, code.selectors(), rev);
            }
        }
        self.unsaved = true;
        Ok(())
    }

    /// Look up the node at an address.
    pub fn get(&self, code: &OctalCode) -> Option<&OctreeNode> {
        let mut node = &self.root;
        for &octant in code.selectors() {
            node = node.child(octant)?;
        }
        Some(node)
    }

    /// Depth-first visit of every node with its address.
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(&OctalCode, &OctreeNode),
    {
        fn walk<F>(code: &OctalCode, node: &OctreeNode, f: &mut F)
        where
            F: FnMut(&OctalCode, &OctreeNode),
        {
            f(code, node);
            for octant in 0..8u8 {
                if let Some(child) = node.child(octant) {
                    // Selector 0..=7 cannot fail and depth was bounded on entry.
                    if let Ok(child_code) = code.child(octant) {
                        walk(&child_code, child, f);
                    }
                }
            }
        }
        walk(&OctalCode::root(), &self.root, &mut f);
    }

    /// All occupancy-bearing nodes.
    pub fn records(&self) -> Vec<VoxelRecord> {
        self.changed_since(0)
    }

    /// Occupancy-bearing nodes whose own payload changed after
    /// `revision`.
    ///
    /// The subtree stamp moves on every edit beneath a node, so whole
    /// untouched subtrees are skipped without descending; a node is
    /// emitted only on its payload stamp, so an occupied ancestor is
    /// not reported just because a descendant changed.
    pub fn changed_since(&self, revision: u64) -> Vec<VoxelRecord> {
        fn walk(code: &OctalCode, node: &OctreeNode, since: u64, out: &mut Vec<VoxelRecord>) {
            if node.revision() <= since {
                return;
            }
            if let Some(payload) = node.payload() {
                if node.payload_revision() > since {
                    out.push(VoxelRecord {
                        code: code.clone(),
                        color: payload.color,
                        revision: node.payload_revision(),
                    });
                }
            }
            for octant in 0..8u8 {
                if let Some(child) = node.child(octant) {
                    if let Ok(child_code) = code.child(octant) {
                        walk(&child_code, child, since, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&OctalCode::root(), &self.root, revision, &mut out);
        out
    }

    /// Node tallies for reporting.
    pub fn counts(&self) -> NodeCounts {
        let mut counts = NodeCounts::default();
        self.visit(|_, node| {
            counts.total += 1;
            if node.has_children() {
                counts.internal += 1;
            } else {
                counts.leaves += 1;
            }
            if node.payload().is_some() {
                counts.occupied += 1;
            }
        });
        counts
    }

    /// Rough usage by category for reporting.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        self.visit(|code, node| {
            usage.node_bytes += mem::size_of::<OctreeNode>() as u64;
            if node.payload().is_some() {
                usage.payload_bytes += mem::size_of::<VoxelPayload>() as u64;
                usage.code_bytes += code.encoded_len() as u64;
            }
        });
        usage
    }

    /// Replace the whole tree with loaded snapshot records. The store
    /// comes out clean: nothing to persist until the next edit.
    pub fn load_records(&mut self, records: &[(OctalCode, VoxelPayload)]) {
        self.root = OctreeNode::new();
        for (code, payload) in records {
            // Set with a payload present cannot fail.
            let _ = self.apply_edit(code, Some(*payload), EditMode::Set);
        }
        self.unsaved = false;
    }
}

/// Erase at the addressed node and prune empty ancestors on the way
/// back up. Returns true when `node` itself became prunable; the root is
/// never removed by its caller.
fn erase_recursive(node: &mut OctreeNode, selectors: &[u8], rev: u64) -> bool {
    node.stamp(rev);
    match selectors.split_first() {
        None => {
            node.clear_payload();
            node.stamp_payload(rev);
        }
        Some((&octant, rest)) => {
            if let Some(child) = node.child_mut(octant) {
                if erase_recursive(child, rest, rev) {
                    node.remove_child(octant);
                }
            }
        }
    }
    node.is_empty()
}
