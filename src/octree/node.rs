// CLASSIFICATION: COMMUNITY
// Filename: node.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! One cube of space at a given octree depth.

/// Occupancy payload carried by a voxel cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelPayload {
    pub color: [u8; 3],
}

/// A node in the octree. The parent exclusively owns its children; the
/// eight slots partition the parent's volume into octants.
#[derive(Debug, Default)]
pub struct OctreeNode {
    children: [Option<Box<OctreeNode>>; 8],
    payload: Option<VoxelPayload>,
    /// Store revision of the last edit that touched this node or a
    /// descendant. Prunes untouched subtrees during change scans.
    revision: u64,
    /// Store revision of the last change to this node's own payload.
    /// Only this stamp marks the node itself as changed; the subtree
    /// stamp above moves on every descendant edit too.
    payload_revision: u64,
}

impl OctreeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self, octant: u8) -> Option<&OctreeNode> {
        self.children[octant as usize].as_deref()
    }

    pub fn child_mut(&mut self, octant: u8) -> Option<&mut OctreeNode> {
        self.children[octant as usize].as_deref_mut()
    }

    /// Get or create the child in the given octant slot.
    pub fn child_or_insert(&mut self, octant: u8) -> &mut OctreeNode {
        self.children[octant as usize].get_or_insert_with(Box::default)
    }

    pub fn remove_child(&mut self, octant: u8) -> Option<Box<OctreeNode>> {
        self.children[octant as usize].take()
    }

    /// Drop every child subtree, returning how many nodes were removed.
    pub fn clear_children(&mut self) -> u64 {
        let mut removed = 0;
        for slot in &mut self.children {
            if let Some(child) = slot.take() {
                removed += child.subtree_size();
            }
        }
        removed
    }

    pub fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }

    pub fn payload(&self) -> Option<&VoxelPayload> {
        self.payload.as_ref()
    }

    pub fn set_payload(&mut self, payload: VoxelPayload) {
        self.payload = Some(payload);
    }

    pub fn clear_payload(&mut self) {
        self.payload = None;
    }

    /// True when the node carries nothing and can be pruned.
    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && !self.has_children()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stamp(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn payload_revision(&self) -> u64 {
        self.payload_revision
    }

    pub fn stamp_payload(&mut self, revision: u64) {
        self.payload_revision = revision;
    }

    /// Count of this node plus all descendants.
    pub fn subtree_size(&self) -> u64 {
        let mut count = 1;
        for child in self.children.iter().flatten() {
            count += child.subtree_size();
        }
        count
    }
}
