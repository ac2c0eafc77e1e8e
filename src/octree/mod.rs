// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2027-08-24

//! Concurrent octree of voxel occupancy plus its snapshot codec.

pub mod codec;
pub mod node;
pub mod store;

pub use codec::FormatError;
pub use node::{OctreeNode, VoxelPayload};
pub use store::{EditError, EditMode, MemoryUsage, NodeCounts, OctreeStore, VoxelRecord};
