// CLASSIFICATION: COMMUNITY
// Filename: packet.rs v0.7
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Typed codec for the voxel datagram protocol.
//!
//! Every packet starts with a type byte and a protocol version byte.
//! Decoders validate remaining length before each field read and return
//! a [`PacketError`] instead of slicing out of bounds; a foreign version
//! byte decodes to [`PacketError::VersionMismatch`], which callers drop
//! silently because the sender runs an incompatible build.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::octal::{OctalCode, OctalCodeError};
use crate::octree::store::{EditMode, VoxelRecord};

/// Bump on any wire-incompatible change.
pub const PROTOCOL_VERSION: u8 = 2;

/// Largest datagram this server sends or accepts.
pub const MAX_PACKET_SIZE: usize = 1400;

/// Bytes of header preceding the records of a voxel-data packet.
pub const VOXEL_DATA_HEADER_LEN: usize = 2 + 2 + 8 + 2;

/// Packet type discriminators, one printable byte each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    VoxelQuery = b'Q',
    SetVoxel = b'S',
    SetVoxelDestructive = b'D',
    EraseVoxel = b'E',
    ZCommand = b'Z',
    JurisdictionRequest = b'J',
    JurisdictionMap = b'M',
    VoxelData = b'V',
    EnvironmentData = b'N',
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'Q' => Some(Self::VoxelQuery),
            b'S' => Some(Self::SetVoxel),
            b'D' => Some(Self::SetVoxelDestructive),
            b'E' => Some(Self::EraseVoxel),
            b'Z' => Some(Self::ZCommand),
            b'J' => Some(Self::JurisdictionRequest),
            b'M' => Some(Self::JurisdictionMap),
            b'V' => Some(Self::VoxelData),
            b'N' => Some(Self::EnvironmentData),
            _ => None,
        }
    }

    /// Edit mode for the single-edit packet types.
    pub fn edit_mode(self) -> Option<EditMode> {
        match self {
            Self::SetVoxel => Some(EditMode::Set),
            Self::SetVoxelDestructive => Some(EditMode::SetDestructive),
            Self::EraseVoxel => Some(EditMode::Erase),
            _ => None,
        }
    }
}

/// Decode failures. Each applies to exactly one packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated")]
    Truncated,
    #[error("unknown packet type byte 0x{0:02x}")]
    UnknownType(u8),
    #[error("protocol version {got} does not match {PROTOCOL_VERSION}")]
    VersionMismatch { got: u8 },
    #[error("unknown edit mode byte 0x{0:02x}")]
    UnknownEditMode(u8),
    #[error("bad octal code: {0}")]
    Code(#[from] OctalCodeError),
}

/// Identifier of an edit-sending or querying client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(pub [u8; 16]);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for SenderId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

/// Cursor over a received datagram; every read is length-checked.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        let end = self.pos.checked_add(n).ok_or(PacketError::Truncated)?;
        if end > self.buf.len() {
            return Err(PacketError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32, PacketError> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(f32::from_le_bytes(raw))
    }

    pub fn read_color(&mut self) -> Result<[u8; 3], PacketError> {
        let bytes = self.take(3)?;
        Ok([bytes[0], bytes[1], bytes[2]])
    }

    pub fn read_sender(&mut self) -> Result<SenderId, PacketError> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(SenderId(raw))
    }

    pub fn read_code(&mut self) -> Result<OctalCode, PacketError> {
        let (code, used) = OctalCode::decode_from(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(code)
    }
}

/// Check the two-byte header and name the packet type.
pub fn classify(bytes: &[u8]) -> Result<PacketType, PacketError> {
    if bytes.len() < 2 {
        return Err(PacketError::Truncated);
    }
    let packet_type = PacketType::from_byte(bytes[0]).ok_or(PacketError::UnknownType(bytes[0]))?;
    if bytes[1] != PROTOCOL_VERSION {
        return Err(PacketError::VersionMismatch { got: bytes[1] });
    }
    Ok(packet_type)
}

fn push_header(out: &mut Vec<u8>, packet_type: PacketType) {
    out.push(packet_type as u8);
    out.push(PROTOCOL_VERSION);
}

/// Sequence, send timestamp and sender id shared by all edit packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditHeader {
    pub sequence: u16,
    pub sent_at_micros: u64,
    pub sender: SenderId,
}

/// One decoded edit operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelEdit {
    pub mode: EditMode,
    pub code: OctalCode,
    pub color: Option<[u8; 3]>,
}

fn read_edit_header(reader: &mut PacketReader<'_>) -> Result<EditHeader, PacketError> {
    Ok(EditHeader {
        sequence: reader.read_u16()?,
        sent_at_micros: reader.read_u64()?,
        sender: reader.read_sender()?,
    })
}

fn read_edit_body(reader: &mut PacketReader<'_>, mode: EditMode) -> Result<VoxelEdit, PacketError> {
    let code = reader.read_code()?;
    let color = match mode {
        EditMode::Erase => None,
        EditMode::Set | EditMode::SetDestructive => Some(reader.read_color()?),
    };
    Ok(VoxelEdit { mode, code, color })
}

/// Decode a set/set-destructive/erase packet.
pub fn decode_single_edit(bytes: &[u8]) -> Result<(EditHeader, VoxelEdit), PacketError> {
    let packet_type = classify(bytes)?;
    let mode = packet_type
        .edit_mode()
        .ok_or(PacketError::UnknownType(bytes[0]))?;
    let mut reader = PacketReader::new(&bytes[2..]);
    let header = read_edit_header(&mut reader)?;
    let edit = read_edit_body(&mut reader, mode)?;
    Ok((header, edit))
}

/// Iterator over the concatenated sub-edits of a Z-command. The first
/// malformed record yields an error and callers keep what was applied
/// before it.
pub struct ZCommandEdits<'a> {
    reader: PacketReader<'a>,
    failed: bool,
}

impl Iterator for ZCommandEdits<'_> {
    type Item = Result<VoxelEdit, PacketError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let item = (|| {
            let mode_byte = self.reader.read_u8()?;
            let mode = PacketType::from_byte(mode_byte)
                .and_then(PacketType::edit_mode)
                .ok_or(PacketError::UnknownEditMode(mode_byte))?;
            read_edit_body(&mut self.reader, mode)
        })();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Decode the header of a batched Z-command, yielding its sub-edits lazily.
pub fn decode_z_command(bytes: &[u8]) -> Result<(EditHeader, ZCommandEdits<'_>), PacketError> {
    match classify(bytes)? {
        PacketType::ZCommand => {}
        _ => return Err(PacketError::UnknownType(bytes[0])),
    }
    let mut reader = PacketReader::new(&bytes[2..]);
    let header = read_edit_header(&mut reader)?;
    Ok((header, ZCommandEdits { reader, failed: false }))
}

fn push_edit_header(out: &mut Vec<u8>, header: &EditHeader) {
    out.extend_from_slice(&header.sequence.to_le_bytes());
    out.extend_from_slice(&header.sent_at_micros.to_le_bytes());
    out.extend_from_slice(&header.sender.0);
}

fn push_edit_body(out: &mut Vec<u8>, edit: &VoxelEdit) {
    edit.code.encode_to(out);
    if edit.mode != EditMode::Erase {
        let color = edit.color.unwrap_or([0; 3]);
        out.extend_from_slice(&color);
    }
}

fn edit_packet_type(mode: EditMode) -> PacketType {
    match mode {
        EditMode::Set => PacketType::SetVoxel,
        EditMode::SetDestructive => PacketType::SetVoxelDestructive,
        EditMode::Erase => PacketType::EraseVoxel,
    }
}

/// Encode a single-edit packet.
pub fn encode_single_edit(header: &EditHeader, edit: &VoxelEdit) -> Vec<u8> {
    let mut out = Vec::new();
    push_header(&mut out, edit_packet_type(edit.mode));
    push_edit_header(&mut out, header);
    push_edit_body(&mut out, edit);
    out
}

/// Encode a batched Z-command packet.
pub fn encode_z_command(header: &EditHeader, edits: &[VoxelEdit]) -> Vec<u8> {
    let mut out = Vec::new();
    push_header(&mut out, PacketType::ZCommand);
    push_edit_header(&mut out, header);
    for edit in edits {
        out.push(edit_packet_type(edit.mode) as u8);
        push_edit_body(&mut out, edit);
    }
    out
}

/// A client announcing its view so the server can stream to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelQuery {
    pub client: SenderId,
    pub position: [f32; 3],
    pub orientation: [f32; 3],
    pub fov: f32,
    /// Last outbound voxel-data sequence the client saw.
    pub last_sequence: u16,
}

/// Decode a voxel-query packet.
pub fn decode_query(bytes: &[u8]) -> Result<VoxelQuery, PacketError> {
    match classify(bytes)? {
        PacketType::VoxelQuery => {}
        _ => return Err(PacketError::UnknownType(bytes[0])),
    }
    let mut reader = PacketReader::new(&bytes[2..]);
    let client = reader.read_sender()?;
    let mut position = [0f32; 3];
    for slot in &mut position {
        *slot = reader.read_f32()?;
    }
    let mut orientation = [0f32; 3];
    for slot in &mut orientation {
        *slot = reader.read_f32()?;
    }
    let fov = reader.read_f32()?;
    let last_sequence = reader.read_u16()?;
    Ok(VoxelQuery { client, position, orientation, fov, last_sequence })
}

/// Encode a voxel-query packet.
pub fn encode_query(query: &VoxelQuery) -> Vec<u8> {
    let mut out = Vec::new();
    push_header(&mut out, PacketType::VoxelQuery);
    out.extend_from_slice(&query.client.0);
    for value in query.position.iter().chain(&query.orientation) {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&query.fov.to_le_bytes());
    out.extend_from_slice(&query.last_sequence.to_le_bytes());
    out
}

/// Wire size of one voxel record in a voxel-data packet.
pub fn record_wire_len(record: &VoxelRecord) -> usize {
    record.code.encoded_len() + 3
}

/// Encode a sequence-numbered voxel-data packet. The caller keeps the
/// record set within [`MAX_PACKET_SIZE`].
pub fn encode_voxel_data(sequence: u16, revision: u64, records: &[VoxelRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(VOXEL_DATA_HEADER_LEN);
    push_header(&mut out, PacketType::VoxelData);
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&revision.to_le_bytes());
    out.extend_from_slice(&(records.len() as u16).to_le_bytes());
    for record in records {
        record.code.encode_to(&mut out);
        out.extend_from_slice(&record.color);
    }
    out
}

/// Decode a voxel-data packet into `(sequence, revision, records)`.
pub fn decode_voxel_data(
    bytes: &[u8],
) -> Result<(u16, u64, Vec<(OctalCode, [u8; 3])>), PacketError> {
    match classify(bytes)? {
        PacketType::VoxelData => {}
        _ => return Err(PacketError::UnknownType(bytes[0])),
    }
    let mut reader = PacketReader::new(&bytes[2..]);
    let sequence = reader.read_u16()?;
    let revision = reader.read_u64()?;
    let count = reader.read_u16()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let code = reader.read_code()?;
        let color = reader.read_color()?;
        records.push((code, color));
    }
    Ok((sequence, revision, records))
}

/// One atmosphere sphere a client should render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentRecord {
    pub id: u8,
    pub gravity: f32,
    pub center: [f32; 3],
    pub radius: f32,
}

impl EnvironmentRecord {
    /// The single world-spanning default environment.
    pub fn default_global() -> Self {
        let half = crate::octal::TREE_SCALE / 2.0;
        Self {
            id: 1,
            gravity: 9.8,
            center: [half, half, half],
            radius: crate::octal::TREE_SCALE * 0.75,
        }
    }

    /// The set a server broadcasts: the global environment, plus a
    /// near-surface layer unless the minimal toggle is on.
    pub fn broadcast_set(minimal: bool) -> Vec<Self> {
        let global = Self::default_global();
        if minimal {
            return vec![global];
        }
        vec![
            global,
            Self {
                id: 2,
                gravity: 9.8,
                center: global.center,
                radius: global.radius / 4.0,
            },
        ]
    }
}

/// Encode an environment-data packet.
pub fn encode_environment_data(records: &[EnvironmentRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    push_header(&mut out, PacketType::EnvironmentData);
    out.push(records.len() as u8);
    for record in records {
        out.push(record.id);
        out.extend_from_slice(&record.gravity.to_le_bytes());
        for value in &record.center {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&record.radius.to_le_bytes());
    }
    out
}

/// Decode an environment-data packet.
pub fn decode_environment_data(bytes: &[u8]) -> Result<Vec<EnvironmentRecord>, PacketError> {
    match classify(bytes)? {
        PacketType::EnvironmentData => {}
        _ => return Err(PacketError::UnknownType(bytes[0])),
    }
    let mut reader = PacketReader::new(&bytes[2..]);
    let count = reader.read_u8()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(EnvironmentRecord {
            id: reader.read_u8()?,
            gravity: reader.read_f32()?,
            center: [reader.read_f32()?, reader.read_f32()?, reader.read_f32()?],
            radius: reader.read_f32()?,
        });
    }
    Ok(records)
}
