// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2027-08-27

//! Wire protocol and datagram transport.

pub mod packet;
pub mod socket;

pub use packet::{PacketError, PacketType, SenderId, PROTOCOL_VERSION};
pub use socket::VoxelSocket;
