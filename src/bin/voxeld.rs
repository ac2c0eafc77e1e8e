// CLASSIFICATION: COMMUNITY
// Filename: voxeld.rs v0.6
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Entry point for the voxeld server binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use tiny_http::{Method, Response, Server};

use voxeld::config::{
    DirectoryConfig, EnvironmentConfig, JurisdictionSource, PersistConfig, ServerConfig,
    DEFAULT_LISTEN_PORT,
};
use voxeld::server::directory::UdpDirectory;
use voxeld::server::{status, ServerContext, VoxelServer};

/// Streaming voxel server.
#[derive(Debug, Parser)]
#[command(name = "voxeld", version)]
struct Opts {
    /// Address to bind the UDP listen socket to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// UDP listen port.
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Snapshot file for voxel persistence.
    #[arg(long, default_value = "voxels.vxs")]
    voxels_persist_file: PathBuf,

    /// Disable voxel persistence entirely.
    #[arg(long)]
    no_voxel_persist: bool,

    /// Seconds between background snapshot checks.
    #[arg(long, default_value_t = 30)]
    persist_interval_secs: u64,

    /// Outbound voxel-data budget per client, in packets per second.
    #[arg(long, default_value_t = 600)]
    packets_per_second: u32,

    /// Broadcast periodic environment-data packets to clients.
    #[arg(long)]
    send_environments: bool,

    /// Broadcast only the single default environment.
    #[arg(long, requires = "send_environments")]
    minimal_environment: bool,

    /// JSON file describing the served jurisdiction.
    #[arg(long, conflicts_with = "jurisdiction_root")]
    jurisdiction_file: Option<PathBuf>,

    /// Octal code of the jurisdiction root served by this instance.
    #[arg(long)]
    jurisdiction_root: Option<String>,

    /// Octal codes delegated away beneath the jurisdiction root.
    #[arg(long, requires = "jurisdiction_root", value_delimiter = ',')]
    jurisdiction_end_nodes: Vec<String>,

    /// Peer servers receiving periodic jurisdiction broadcasts.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Directory service to check in with.
    #[arg(long)]
    directory: Option<SocketAddr>,

    /// Seconds between directory check-ins.
    #[arg(long, default_value_t = 1)]
    directory_interval_secs: u64,

    /// Unanswered check-ins tolerated before shutting down.
    #[arg(long, default_value_t = 5)]
    directory_silent_budget: u32,

    /// HTTP status port. 0 disables the status page.
    #[arg(long, default_value_t = 8070)]
    status_port: u16,
}

impl Opts {
    fn server_config(&self) -> ServerConfig {
        let persist = if self.no_voxel_persist {
            None
        } else {
            Some(PersistConfig {
                path: self.voxels_persist_file.clone(),
                interval: Duration::from_secs(self.persist_interval_secs),
            })
        };
        let jurisdiction = if let Some(path) = &self.jurisdiction_file {
            JurisdictionSource::File(path.clone())
        } else if let Some(root) = &self.jurisdiction_root {
            JurisdictionSource::Roots {
                root: root.clone(),
                end_nodes: self.jurisdiction_end_nodes.clone(),
            }
        } else {
            JurisdictionSource::None
        };
        let directory = self.directory.map(|addr| DirectoryConfig {
            addr,
            check_in_interval: Duration::from_secs(self.directory_interval_secs),
            silent_check_in_budget: self.directory_silent_budget,
        });
        ServerConfig {
            bind_addr: SocketAddr::new(self.bind, self.port),
            persist,
            packets_per_second: self.packets_per_second,
            environment: EnvironmentConfig {
                broadcast: self.send_environments,
                minimal: self.minimal_environment,
            },
            jurisdiction,
            peers: self.peers.clone(),
            directory,
            ..ServerConfig::default()
        }
    }
}

/// Serve the status page until the process exits. POSTs to
/// /reset-stats and /shutdown act on the live server.
fn spawn_status_server(port: u16, ctx: ServerContext, shutdown: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let server = match Server::http(addr) {
            Ok(server) => server,
            Err(err) => {
                warn!("status server failed to bind {addr}: {err}");
                return;
            }
        };
        info!("status page on http://{addr}/");
        for req in server.incoming_requests() {
            let method = req.method().clone();
            let url = req.url().to_string();
            let result = match (method, url.as_str()) {
                (Method::Get, "/") | (Method::Get, "/status") => {
                    match serde_json::to_string_pretty(&status::gather(&ctx)) {
                        Ok(body) => req.respond(Response::from_string(body)),
                        Err(err) => {
                            warn!("status serialization failed: {err}");
                            req.respond(Response::empty(500))
                        }
                    }
                }
                (Method::Post, "/reset-stats") => {
                    ctx.edit_stats.reset();
                    req.respond(Response::empty(200))
                }
                (Method::Post, "/shutdown") => {
                    info!("shutdown requested through the status page");
                    shutdown.store(true, Ordering::Relaxed);
                    req.respond(Response::empty(200))
                }
                _ => req.respond(Response::empty(404)),
            };
            if let Err(err) = result {
                warn!("status response failed: {err}");
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let config = opts.server_config();

    let mut server = VoxelServer::new(config)?;
    if let Some(addr) = opts.directory {
        let listen_port = server.local_addr()?.port();
        let client = UdpDirectory::new(addr, listen_port)
            .with_context(|| format!("directory client for {addr}"))?;
        server = server.with_directory(Box::new(client));
    }
    if opts.status_port != 0 {
        spawn_status_server(opts.status_port, server.context(), server.shutdown_handle());
    }
    server.run()
}
