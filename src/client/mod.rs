// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Per-client session records and their lifecycle.
//!
//! A session is born when a client's first voxel query arrives, goes
//! Silent when queries stop, and is removed after a longer timeout.
//! Each Active session has a dedicated send worker ([`sender`]).

pub mod sender;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use crate::net::packet::{SenderId, VoxelQuery};

pub use sender::ClientSender;

/// Client liveness, driven by query arrival times. A session only
/// exists once a query has arrived, so sessions are born `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Active,
    Silent,
    Removed,
}

/// View parameters from the client's last query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub position: [f32; 3],
    pub orientation: [f32; 3],
    pub fov: f32,
}

/// Everything the server tracks for one connected client.
#[derive(Debug)]
pub struct ClientSession {
    pub addr: SocketAddr,
    pub client_id: SenderId,
    pub state: SessionState,
    pub view: Option<ViewParams>,
    pub last_query_at: Instant,
    /// Sequence stamped on the next outbound voxel-data packet.
    pub out_sequence: u16,
    /// Last outbound sequence the client reported seeing.
    pub last_acked_sequence: u16,
}

impl ClientSession {
    fn new(addr: SocketAddr, client_id: SenderId, now: Instant) -> Self {
        Self {
            addr,
            client_id,
            state: SessionState::Active,
            view: None,
            last_query_at: now,
            out_sequence: 0,
            last_acked_sequence: 0,
        }
    }

    fn apply_query(&mut self, query: &VoxelQuery, now: Instant) {
        self.view = Some(ViewParams {
            position: query.position,
            orientation: query.orientation,
            fov: query.fov,
        });
        self.last_query_at = now;
        self.last_acked_sequence = query.last_sequence;
        self.state = SessionState::Active;
    }

    /// Claim the next outbound sequence number.
    pub fn next_sequence(&mut self) -> u16 {
        let seq = self.out_sequence;
        self.out_sequence = self.out_sequence.wrapping_add(1);
        seq
    }
}

pub type SharedSession = Arc<Mutex<ClientSession>>;

/// One row of the status report's session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub addr: String,
    pub client_id: SenderId,
    pub state: SessionState,
    pub out_sequence: u16,
}

/// All connected clients, keyed by network address. Owned by the server
/// context and shared with the receive loop and the status layer.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: Mutex<HashMap<SocketAddr, SharedSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, SharedSession>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a query, creating the session on first contact. Returns
    /// the session and whether it is new (and so needs a send worker).
    pub fn record_query(
        &self,
        addr: SocketAddr,
        query: &VoxelQuery,
        now: Instant,
    ) -> (SharedSession, bool) {
        let mut table = self.lock();
        let (session, is_new) = match table.get(&addr) {
            Some(existing) => (existing.clone(), false),
            None => {
                info!("new client session {} from {addr}", query.client);
                let session = Arc::new(Mutex::new(ClientSession::new(addr, query.client, now)));
                table.insert(addr, session.clone());
                (session, true)
            }
        };
        session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_query(query, now);
        (session, is_new)
    }

    /// Advance lifecycle states from query silence. Sessions past the
    /// remove timeout are dropped from the table; their send workers
    /// observe the Removed state through their own handle and exit.
    pub fn sweep(&self, now: Instant, silent_after: Duration, remove_after: Duration) -> usize {
        let mut table = self.lock();
        let mut removed = 0;
        table.retain(|addr, session| {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            let silence = now.saturating_duration_since(session.last_query_at);
            if silence >= remove_after {
                session.state = SessionState::Removed;
                info!("removing silent client session {addr}");
                removed += 1;
                return false;
            }
            if silence >= silent_after && session.state == SessionState::Active {
                debug!("client session {addr} went silent");
                session.state = SessionState::Silent;
            }
            true
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<SharedSession> {
        self.lock().get(addr).cloned()
    }

    /// Snapshot for the status layer.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let table = self.lock();
        let mut rows: Vec<_> = table
            .values()
            .map(|session| {
                let session = session.lock().unwrap_or_else(PoisonError::into_inner);
                SessionSummary {
                    addr: session.addr.to_string(),
                    client_id: session.client_id,
                    state: session.state,
                    out_sequence: session.out_sequence,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.addr.cmp(&b.addr));
        rows
    }
}
