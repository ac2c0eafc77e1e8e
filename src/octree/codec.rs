// CLASSIFICATION: COMMUNITY
// Filename: codec.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-24

//! Versioned binary snapshot format for the octree.
//!
//! Layout: magic `VOXS`, `u16` format version, `u64` record count, then
//! one record per occupancy-bearing node: wire-form octal code followed
//! by three color bytes. Round-trips the tree losslessly.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;

use crate::octal::{OctalCode, OctalCodeError};
use crate::octree::node::VoxelPayload;
use crate::octree::store::OctreeStore;

const MAGIC: &[u8; 4] = b"VOXS";
const FORMAT_VERSION: u16 = 1;

/// Errors from reading a persisted snapshot.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("snapshot is not a voxel snapshot file")]
    BadMagic,
    #[error("snapshot format version {0} not supported")]
    UnsupportedVersion(u16),
    #[error("snapshot truncated")]
    Truncated,
    #[error("snapshot holds a malformed octal code: {0}")]
    Code(#[from] OctalCodeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Encode the full tree into snapshot bytes.
pub fn encode_snapshot(store: &OctreeStore) -> Vec<u8> {
    let records = store.records();
    let mut out = Vec::with_capacity(16 + records.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(records.len() as u64).to_le_bytes());
    for record in &records {
        record.code.encode_to(&mut out);
        out.extend_from_slice(&record.color);
    }
    out
}

/// Decode snapshot bytes into occupancy records.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<(OctalCode, VoxelPayload)>, FormatError> {
    let mut pos = 0usize;
    let take = |pos: &mut usize, n: usize| -> Result<&[u8], FormatError> {
        let end = pos.checked_add(n).ok_or(FormatError::Truncated)?;
        if end > bytes.len() {
            return Err(FormatError::Truncated);
        }
        let slice = &bytes[*pos..end];
        *pos = end;
        Ok(slice)
    };

    if take(&mut pos, 4)? != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = u16::from_le_bytes(take(&mut pos, 2)?.try_into().unwrap_or([0; 2]));
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let count = u64::from_le_bytes(take(&mut pos, 8)?.try_into().unwrap_or([0; 8]));

    let mut records = Vec::new();
    for _ in 0..count {
        let (code, used) = OctalCode::decode_from(&bytes[pos..])?;
        pos += used;
        let color = take(&mut pos, 3)?;
        records.push((
            code,
            VoxelPayload { color: [color[0], color[1], color[2]] },
        ));
    }
    Ok(records)
}

impl OctreeStore {
    /// Write the full tree in snapshot format.
    pub fn serialize_to<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_all(&encode_snapshot(self))
    }

    /// Reconstruct the tree from a snapshot file. On any format error the
    /// caller keeps an empty store rather than aborting.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FormatError> {
        let bytes = fs::read(path)?;
        let records = decode_snapshot(&bytes)?;
        self.load_records(&records);
        Ok(())
    }
}
