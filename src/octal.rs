// CLASSIFICATION: COMMUNITY
// Filename: octal.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-21

//! Octal-code addressing for the voxel octree.
//!
//! An octal code is the path from the root to a node, one octant
//! selector (0..=7) per level. The empty code addresses the root. On the
//! wire a code is a length byte followed by one byte per selector.

use std::fmt;

use thiserror::Error;

/// Edge length of the root cell in world units.
pub const TREE_SCALE: f32 = 128.0;

/// Deepest addressable level. Bounds hostile wire input.
pub const MAX_OCTAL_DEPTH: usize = 64;

/// Errors from parsing or decoding octal codes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OctalCodeError {
    #[error("octant selector {0} out of range")]
    InvalidSelector(u8),
    #[error("octal code truncated")]
    Truncated,
    #[error("octal code deeper than {MAX_OCTAL_DEPTH} levels")]
    TooDeep,
}

/// Path from the root to one octree cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OctalCode {
    selectors: Vec<u8>,
}

/// Axis-aligned cell addressed by a code, in the unit cube `[0,1)^3`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min: [f32; 3],
    pub size: f32,
}

impl CellBounds {
    /// Cell center in world units (unit cube scaled by [`TREE_SCALE`]).
    pub fn center_world(&self) -> [f32; 3] {
        let half = self.size / 2.0;
        [
            (self.min[0] + half) * TREE_SCALE,
            (self.min[1] + half) * TREE_SCALE,
            (self.min[2] + half) * TREE_SCALE,
        ]
    }
}

impl OctalCode {
    /// The root address.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a code from raw selectors, rejecting anything >= 8.
    pub fn from_selectors(selectors: &[u8]) -> Result<Self, OctalCodeError> {
        if selectors.len() > MAX_OCTAL_DEPTH {
            return Err(OctalCodeError::TooDeep);
        }
        for &s in selectors {
            if s > 7 {
                return Err(OctalCodeError::InvalidSelector(s));
            }
        }
        Ok(Self { selectors: selectors.to_vec() })
    }

    /// Parse a code from its octal digit string, e.g. `"024"`.
    pub fn parse(text: &str) -> Result<Self, OctalCodeError> {
        let mut selectors = Vec::with_capacity(text.len());
        for ch in text.chars() {
            let digit = ch.to_digit(8).ok_or(OctalCodeError::InvalidSelector(ch as u8))?;
            selectors.push(digit as u8);
        }
        Self::from_selectors(&selectors)
    }

    pub fn is_root(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.selectors.len()
    }

    pub fn selectors(&self) -> &[u8] {
        &self.selectors
    }

    /// The code one level deeper through the given octant.
    pub fn child(&self, octant: u8) -> Result<Self, OctalCodeError> {
        if octant > 7 {
            return Err(OctalCodeError::InvalidSelector(octant));
        }
        if self.depth() >= MAX_OCTAL_DEPTH {
            return Err(OctalCodeError::TooDeep);
        }
        let mut selectors = self.selectors.clone();
        selectors.push(octant);
        Ok(Self { selectors })
    }

    /// The enclosing cell's code, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self { selectors: self.selectors[..self.depth() - 1].to_vec() })
    }

    /// True when `other` lies within this cell (equal codes count).
    pub fn is_prefix_of(&self, other: &OctalCode) -> bool {
        other.selectors.len() >= self.selectors.len()
            && other.selectors[..self.selectors.len()] == self.selectors[..]
    }

    /// The cell this code addresses within the unit cube.
    ///
    /// Selector bit 0 picks the upper half in x, bit 1 in y, bit 2 in z.
    pub fn bounds(&self) -> CellBounds {
        let mut min = [0.0f32; 3];
        let mut size = 1.0f32;
        for &s in &self.selectors {
            size /= 2.0;
            if s & 0b001 != 0 {
                min[0] += size;
            }
            if s & 0b010 != 0 {
                min[1] += size;
            }
            if s & 0b100 != 0 {
                min[2] += size;
            }
        }
        CellBounds { min, size }
    }

    /// Append the wire form: one length byte then one byte per selector.
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        out.push(self.selectors.len() as u8);
        out.extend_from_slice(&self.selectors);
    }

    /// Wire size in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + self.selectors.len()
    }

    /// Decode a wire-form code from the front of `buf`, returning the code
    /// and the number of bytes consumed. Never reads past `buf`.
    pub fn decode_from(buf: &[u8]) -> Result<(Self, usize), OctalCodeError> {
        let (&len, rest) = buf.split_first().ok_or(OctalCodeError::Truncated)?;
        let len = len as usize;
        if len > MAX_OCTAL_DEPTH {
            return Err(OctalCodeError::TooDeep);
        }
        if rest.len() < len {
            return Err(OctalCodeError::Truncated);
        }
        let code = Self::from_selectors(&rest[..len])?;
        Ok((code, 1 + len))
    }
}

impl fmt::Display for OctalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "*");
        }
        for s in &self.selectors {
            write!(f, "{s}")?;
        }
        Ok(())
    }
}
