// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v1.0
// Date Modified: 2027-08-29
// Author: Lukas Bower

//! Root library for the voxeld streaming voxel server.

/// Octal addressing codes and cell geometry
pub mod octal;

/// Authoritative octree store, nodes, and snapshot codec
pub mod octree;

/// Wire packets and the UDP socket wrapper
pub mod net;

/// Edit packet processing and per-sender statistics
pub mod edit;

/// Client sessions and per-client send workers
pub mod client;

/// Jurisdiction ownership map and announcer
pub mod jurisdiction;

/// Snapshot persistence worker
pub mod persist;

/// Server assembly, directory client, and status snapshot
pub mod server;

/// Server configuration
pub mod config;

/// Small shared helpers
pub mod util;
