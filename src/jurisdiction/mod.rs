// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.4
// Author: Lukas Bower
// Date Modified: 2027-08-27

//! Spatial ownership: which slice of the octree this instance serves.

pub mod announcer;

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::packet::{self, PacketError, PacketReader, PacketType};
use crate::octal::{OctalCode, OctalCodeError};

pub use announcer::JurisdictionAnnouncer;

/// Errors constructing a jurisdiction map.
#[derive(Debug, Error)]
pub enum JurisdictionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("jurisdiction file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad octal code in jurisdiction source: {0}")]
    Code(#[from] OctalCodeError),
}

/// On-disk form of a jurisdiction map.
#[derive(Debug, Serialize, Deserialize)]
struct JurisdictionFile {
    root: String,
    #[serde(default)]
    end_nodes: Vec<String>,
}

/// The set of octal-code prefixes this instance is authoritative for.
/// Read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JurisdictionMap {
    root: OctalCode,
    end_nodes: Vec<OctalCode>,
}

impl JurisdictionMap {
    /// Build from a root prefix plus prefixes delegated to peers.
    pub fn from_parts(root: &str, end_nodes: &[&str]) -> Result<Self, JurisdictionError> {
        Ok(Self {
            root: OctalCode::parse(root)?,
            end_nodes: end_nodes
                .iter()
                .map(|s| OctalCode::parse(s))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Load from a JSON file listing the root prefix and end nodes.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, JurisdictionError> {
        let text = fs::read_to_string(path)?;
        let file: JurisdictionFile = serde_json::from_str(&text)?;
        let end_nodes: Vec<&str> = file.end_nodes.iter().map(String::as_str).collect();
        Self::from_parts(&file.root, &end_nodes)
    }

    pub fn root(&self) -> &OctalCode {
        &self.root
    }

    pub fn end_nodes(&self) -> &[OctalCode] {
        &self.end_nodes
    }

    /// True when this instance is authoritative for `code`: the code
    /// falls under the owned root and under no delegated end node.
    pub fn owns(&self, code: &OctalCode) -> bool {
        self.root.is_prefix_of(code) && !self.end_nodes.iter().any(|end| end.is_prefix_of(code))
    }

    /// Serialize as a jurisdiction packet.
    pub fn encode_packet(&self) -> Vec<u8> {
        let mut out = vec![PacketType::JurisdictionMap as u8, packet::PROTOCOL_VERSION];
        self.root.encode_to(&mut out);
        out.push(self.end_nodes.len() as u8);
        for end in &self.end_nodes {
            end.encode_to(&mut out);
        }
        out
    }

    /// Decode a jurisdiction packet back into a map.
    pub fn decode_packet(bytes: &[u8]) -> Result<Self, PacketError> {
        match packet::classify(bytes)? {
            PacketType::JurisdictionMap => {}
            _ => return Err(PacketError::UnknownType(bytes[0])),
        }
        let mut reader = PacketReader::new(&bytes[2..]);
        let root = reader.read_code()?;
        let count = reader.read_u8()?;
        let mut end_nodes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            end_nodes.push(reader.read_code()?);
        }
        Ok(Self { root, end_nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn owns_codes_under_the_root_prefix() {
        let map = JurisdictionMap::from_parts("2", &[]).unwrap();
        assert!(map.owns(&OctalCode::parse("24").unwrap()));
        assert!(map.owns(&OctalCode::parse("2").unwrap()));
        assert!(!map.owns(&OctalCode::parse("3").unwrap()));
        assert!(!map.owns(&OctalCode::root()));
    }

    #[test]
    fn delegated_end_nodes_are_not_owned() {
        let map = JurisdictionMap::from_parts("2", &["24", "25"]).unwrap();
        assert!(map.owns(&OctalCode::parse("23").unwrap()));
        assert!(!map.owns(&OctalCode::parse("24").unwrap()));
        assert!(!map.owns(&OctalCode::parse("247").unwrap()));
        assert!(!map.owns(&OctalCode::parse("251").unwrap()));
    }

    #[test]
    fn disjoint_delegations_partition_ownership() {
        let parent = JurisdictionMap::from_parts("2", &["24", "25"]).unwrap();
        let child_a = JurisdictionMap::from_parts("24", &[]).unwrap();
        let child_b = JurisdictionMap::from_parts("25", &[]).unwrap();
        for code in ["24", "240", "25", "257", "23", "2"] {
            let code = OctalCode::parse(code).unwrap();
            let owners = [parent.owns(&code), child_a.owns(&code), child_b.owns(&code)];
            assert_eq!(owners.iter().filter(|&&o| o).count(), 1, "code {code}");
        }
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"root": "2", "end_nodes": ["24"]}}"#).unwrap();
        let map = JurisdictionMap::from_file(file.path()).unwrap();
        assert!(map.owns(&OctalCode::parse("23").unwrap()));
        assert!(!map.owns(&OctalCode::parse("24").unwrap()));
    }

    #[test]
    fn rejects_unreadable_sources() {
        assert!(matches!(
            JurisdictionMap::from_file("/no/such/jurisdiction.json"),
            Err(JurisdictionError::Io(_))
        ));
        assert!(matches!(
            JurisdictionMap::from_parts("29", &[]),
            Err(JurisdictionError::Code(_))
        ));
    }

    #[test]
    fn packet_round_trips() {
        let map = JurisdictionMap::from_parts("2", &["24", "257"]).unwrap();
        let bytes = map.encode_packet();
        let decoded = JurisdictionMap::decode_packet(&bytes).unwrap();
        assert_eq!(decoded, map);
        assert!(JurisdictionMap::decode_packet(&bytes[..3]).is_err());
    }
}
