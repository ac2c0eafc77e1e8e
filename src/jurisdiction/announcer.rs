// CLASSIFICATION: COMMUNITY
// Filename: announcer.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-27

//! Worker answering jurisdiction queries and broadcasting to peers.
//!
//! Queries are idempotent and clients re-query, so there is no retry or
//! ack machinery here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::jurisdiction::JurisdictionMap;
use crate::net::VoxelSocket;

const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Background worker owning the jurisdiction reply queue.
pub struct JurisdictionAnnouncer {
    map: Option<Arc<JurisdictionMap>>,
    socket: VoxelSocket,
    peers: Vec<SocketAddr>,
    broadcast_interval: Duration,
    queue: Receiver<SocketAddr>,
    shutdown: Arc<AtomicBool>,
}

impl JurisdictionAnnouncer {
    /// Spawn the worker, returning the query queue and its join handle.
    pub fn spawn(
        map: Option<Arc<JurisdictionMap>>,
        socket: VoxelSocket,
        peers: Vec<SocketAddr>,
        broadcast_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> (Sender<SocketAddr>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel();
        let mut announcer = Self {
            map,
            socket,
            peers,
            broadcast_interval,
            queue: rx,
            shutdown,
        };
        let handle = thread::spawn(move || announcer.run());
        (tx, handle)
    }

    fn run(&mut self) {
        let mut last_broadcast = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.queue.recv_timeout(QUEUE_POLL) {
                Ok(addr) => self.answer(addr),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.peers.is_empty() && last_broadcast.elapsed() >= self.broadcast_interval {
                last_broadcast = Instant::now();
                self.broadcast();
            }
        }
        debug!("jurisdiction announcer exiting");
    }

    fn answer(&self, addr: SocketAddr) {
        let Some(map) = &self.map else {
            debug!("jurisdiction query from {addr} but no jurisdiction configured");
            return;
        };
        if let Err(e) = self.socket.send_to(&map.encode_packet(), addr) {
            warn!("failed to answer jurisdiction query from {addr}: {e}");
        }
    }

    fn broadcast(&self) {
        let Some(map) = &self.map else { return };
        let packet = map.encode_packet();
        for &peer in &self.peers {
            if let Err(e) = self.socket.send_to(&packet, peer) {
                warn!("jurisdiction broadcast to {peer} failed: {e}");
            }
        }
    }
}
