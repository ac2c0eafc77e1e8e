// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.7
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Server assembly and the main receive loop.
//!
//! One thread owns the socket and routes datagrams: queries update the
//! session table and spawn send workers, edits go to the edit queue,
//! jurisdiction requests go to the announcer. Everything else runs on
//! worker threads sharing the context through `Arc`.

pub mod directory;
pub mod status;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::client::{ClientSender, SessionTable};
use crate::config::{JurisdictionSource, ServerConfig};
use crate::edit::{EditPacketProcessor, EditStats, QueuedPacket};
use crate::jurisdiction::{JurisdictionAnnouncer, JurisdictionMap};
use crate::net::packet::{self, PacketError, PacketType};
use crate::net::VoxelSocket;
use crate::octree::OctreeStore;
use crate::persist::{PersistManager, PersistStatus};
use crate::server::directory::DirectoryClient;
use crate::util::unix_micros;

/// Shared state every worker and the status layer hang off.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub store: Arc<RwLock<OctreeStore>>,
    pub jurisdiction: Option<Arc<JurisdictionMap>>,
    pub sessions: Arc<SessionTable>,
    pub edit_stats: Arc<EditStats>,
    pub persist_status: Arc<Mutex<PersistStatus>>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl ServerContext {
    pub fn new(config: ServerConfig, jurisdiction: Option<Arc<JurisdictionMap>>) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(RwLock::new(OctreeStore::new())),
            jurisdiction,
            sessions: Arc::new(SessionTable::new()),
            edit_stats: Arc::new(EditStats::new()),
            persist_status: Arc::new(Mutex::new(PersistStatus::default())),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// The server itself. Owns the socket and the shutdown flag.
pub struct VoxelServer {
    ctx: ServerContext,
    socket: VoxelSocket,
    shutdown: Arc<AtomicBool>,
    directory: Option<Box<dyn DirectoryClient>>,
}

impl VoxelServer {
    /// Resolve the jurisdiction source and bind the listen socket.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let jurisdiction = match &config.jurisdiction {
            JurisdictionSource::None => None,
            JurisdictionSource::File(path) => Some(Arc::new(
                JurisdictionMap::from_file(path)
                    .with_context(|| format!("jurisdiction file {}", path.display()))?,
            )),
            JurisdictionSource::Roots { root, end_nodes } => {
                let ends: Vec<&str> = end_nodes.iter().map(String::as_str).collect();
                Some(Arc::new(JurisdictionMap::from_parts(root, &ends)?))
            }
        };
        let socket = VoxelSocket::bind(config.bind_addr, config.recv_timeout)
            .with_context(|| format!("binding {}", config.bind_addr))?;
        info!("listening on {}", socket.local_addr()?);
        if let Some(map) = &jurisdiction {
            info!("serving jurisdiction rooted at {}", map.root());
        }
        Ok(Self {
            ctx: ServerContext::new(config, jurisdiction),
            socket,
            shutdown: Arc::new(AtomicBool::new(false)),
            directory: None,
        })
    }

    /// Attach a directory client; check-ins start when the loop runs.
    pub fn with_directory(mut self, directory: Box<dyn DirectoryClient>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn context(&self) -> ServerContext {
        self.ctx.clone()
    }

    /// Flag handle for external shutdown (signal handlers, tests).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run until the shutdown flag is set. Workers are joined in
    /// dependency order; persistence goes last so the final snapshot
    /// sees every applied edit.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let persist_handle = match &self.ctx.config.persist {
            Some(cfg) => {
                let manager = PersistManager::new(
                    self.ctx.store.clone(),
                    cfg.path.clone(),
                    cfg.interval,
                    self.shutdown.clone(),
                )
                .with_status(self.ctx.persist_status.clone());
                manager.load();
                Some(manager.spawn())
            }
            None => None,
        };

        let (edit_tx, edit_handle) = EditPacketProcessor::new(
            self.ctx.store.clone(),
            self.ctx.edit_stats.clone(),
            self.shutdown.clone(),
        )
        .spawn();

        let (jur_tx, jur_handle) = JurisdictionAnnouncer::spawn(
            self.ctx.jurisdiction.clone(),
            self.socket.try_clone()?,
            self.ctx.config.peers.clone(),
            self.ctx.config.jurisdiction_broadcast_interval,
            self.shutdown.clone(),
        );

        let mut directory = self.directory.take();
        let mut last_check_in: Option<Instant> = None;
        let mut last_sweep = Instant::now();
        let mut send_workers: Vec<JoinHandle<()>> = Vec::new();
        let mut buf = [0u8; 2048];

        while !self.shutdown.load(Ordering::Relaxed) {
            if let (Some(client), Some(cfg)) =
                (directory.as_mut(), self.ctx.config.directory.as_ref())
            {
                let due = last_check_in.map_or(true, |t| t.elapsed() >= cfg.check_in_interval);
                if due {
                    last_check_in = Some(Instant::now());
                    if let Err(err) = client.check_in() {
                        warn!("directory check-in failed: {err}");
                    }
                    if client.silent_check_ins() >= cfg.silent_check_in_budget {
                        warn!(
                            "directory silent for {} check-ins, shutting down",
                            client.silent_check_ins()
                        );
                        self.shutdown.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }

            if last_sweep.elapsed() >= self.ctx.config.sweep_interval {
                last_sweep = Instant::now();
                let removed = self.ctx.sessions.sweep(
                    Instant::now(),
                    self.ctx.config.client_silent_timeout,
                    self.ctx.config.client_remove_timeout,
                );
                if removed > 0 {
                    info!("removed {removed} idle sessions");
                }
                send_workers.retain(|handle| !handle.is_finished());
            }

            match self.socket.recv_timeout(&mut buf) {
                Ok(Some((len, from))) => {
                    self.dispatch(&buf[..len], from, &edit_tx, &jur_tx, &mut send_workers)
                }
                Ok(None) => {}
                Err(err) => warn!("receive error: {err}"),
            }
        }

        self.shutdown.store(true, Ordering::Relaxed);
        info!("shutting down, joining workers");
        drop(edit_tx);
        drop(jur_tx);
        let _ = jur_handle.join();
        let _ = edit_handle.join();
        for handle in send_workers {
            let _ = handle.join();
        }
        if let Some(handle) = persist_handle {
            let _ = handle.join();
        }
        info!("server stopped");
        Ok(())
    }

    /// Route one datagram. Malformed traffic is dropped quietly; the
    /// public internet sends plenty.
    fn dispatch(
        &self,
        bytes: &[u8],
        from: SocketAddr,
        edit_tx: &Sender<QueuedPacket>,
        jur_tx: &Sender<SocketAddr>,
        send_workers: &mut Vec<JoinHandle<()>>,
    ) {
        let packet_type = match packet::classify(bytes) {
            Ok(packet_type) => packet_type,
            Err(PacketError::VersionMismatch { got }) => {
                debug!("dropping protocol version {got} packet from {from}");
                return;
            }
            Err(err) => {
                debug!("dropping malformed packet from {from}: {err}");
                return;
            }
        };
        match packet_type {
            PacketType::VoxelQuery => self.handle_query(bytes, from, send_workers),
            PacketType::SetVoxel
            | PacketType::SetVoxelDestructive
            | PacketType::EraseVoxel
            | PacketType::ZCommand => {
                let queued = QueuedPacket {
                    from,
                    data: bytes.to_vec(),
                    received_at_micros: unix_micros(),
                };
                if edit_tx.send(queued).is_err() {
                    warn!("edit queue closed, dropping packet from {from}");
                }
            }
            PacketType::JurisdictionRequest => {
                if jur_tx.send(from).is_err() {
                    warn!("jurisdiction queue closed, dropping request from {from}");
                }
            }
            PacketType::JurisdictionMap | PacketType::VoxelData | PacketType::EnvironmentData => {
                debug!("ignoring outbound-only packet type from {from}");
            }
        }
    }

    fn handle_query(&self, bytes: &[u8], from: SocketAddr, send_workers: &mut Vec<JoinHandle<()>>) {
        let query = match packet::decode_query(bytes) {
            Ok(query) => query,
            Err(err) => {
                debug!("dropping bad query from {from}: {err}");
                return;
            }
        };
        let (session, is_new) = self.ctx.sessions.record_query(from, &query, Instant::now());
        if !is_new {
            return;
        }
        match self.socket.try_clone() {
            Ok(socket) => {
                let sender = ClientSender::new(
                    session,
                    self.ctx.store.clone(),
                    socket,
                    self.ctx.config.send_interval(),
                    self.ctx.config.packets_per_client_per_interval(),
                    self.ctx.config.environment,
                    self.shutdown.clone(),
                );
                send_workers.push(sender.spawn());
            }
            Err(err) => warn!("cannot clone socket for {from}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn new_binds_an_ephemeral_port() {
        let server = VoxelServer::new(local_config()).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(server.context().sessions.is_empty());
    }

    #[test]
    fn jurisdiction_roots_are_resolved_at_construction() {
        let mut config = local_config();
        config.jurisdiction = JurisdictionSource::Roots {
            root: "2".into(),
            end_nodes: vec!["24".into()],
        };
        let server = VoxelServer::new(config).unwrap();
        let map = server.context().jurisdiction.unwrap();
        assert!(map.owns(&crate::octal::OctalCode::parse("27").unwrap()));
        assert!(!map.owns(&crate::octal::OctalCode::parse("24").unwrap()));
    }
}
