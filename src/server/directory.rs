// CLASSIFICATION: COMMUNITY
// Filename: directory.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-29

//! Liveness check-in with the external directory service.
//!
//! The directory's address format is opaque to the core beyond
//! (IP, port). Check-ins are fire-and-forget heartbeats; a reply within
//! the short ack window resets the silent counter, and the run loop
//! gives up after the configured silent budget.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::net::packet::PROTOCOL_VERSION;
use crate::net::VoxelSocket;

const ACK_WINDOW: Duration = Duration::from_millis(20);

/// Heartbeat type byte, outside the voxel packet namespace.
pub const CHECK_IN_TYPE: u8 = b'H';

/// Periodic liveness reporting to an external registry.
pub trait DirectoryClient: Send {
    /// Send one heartbeat and collect any ack.
    fn check_in(&mut self) -> io::Result<()>;

    /// Consecutive check-ins that went unanswered.
    fn silent_check_ins(&self) -> u32;
}

/// UDP directory client. Heartbeats carry the server's listen port so
/// the directory can hand the address to clients and peers.
pub struct UdpDirectory {
    socket: VoxelSocket,
    directory_addr: SocketAddr,
    listen_port: u16,
    silent: u32,
}

impl UdpDirectory {
    pub fn new(directory_addr: SocketAddr, listen_port: u16) -> io::Result<Self> {
        Ok(Self {
            socket: VoxelSocket::bind("0.0.0.0:0", ACK_WINDOW)?,
            directory_addr,
            listen_port,
            silent: 0,
        })
    }
}

impl DirectoryClient for UdpDirectory {
    fn check_in(&mut self) -> io::Result<()> {
        let mut heartbeat = vec![CHECK_IN_TYPE, PROTOCOL_VERSION];
        heartbeat.extend_from_slice(&self.listen_port.to_le_bytes());
        self.socket.send_to(&heartbeat, self.directory_addr)?;
        let mut buf = [0u8; 64];
        match self.socket.recv_timeout(&mut buf)? {
            Some(_) => self.silent = 0,
            None => self.silent += 1,
        }
        Ok(())
    }

    fn silent_check_ins(&self) -> u32 {
        self.silent
    }
}
