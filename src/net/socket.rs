// CLASSIFICATION: COMMUNITY
// Filename: socket.rs v0.2
// Author: Lukas Bower
// Date Modified: 2027-08-27

//! UDP socket wrapper with a bounded receive so loops stay responsive.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Connectionless datagram endpoint shared by the receive loop and the
/// worker threads (via [`VoxelSocket::try_clone`]).
#[derive(Debug)]
pub struct VoxelSocket {
    socket: UdpSocket,
}

impl VoxelSocket {
    /// Bind with a read timeout so no receive blocks indefinitely.
    pub fn bind<A: ToSocketAddrs>(addr: A, read_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(Self { socket })
    }

    /// Receive one datagram, or `None` when the timeout elapsed.
    pub fn recv_timeout(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self { socket: self.socket.try_clone()? })
    }
}
