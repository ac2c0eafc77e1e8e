// CLASSIFICATION: COMMUNITY
// Filename: server_loop.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-29

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::tempdir;

use voxeld::config::{PersistConfig, ServerConfig};
use voxeld::net::packet::{self, EditHeader, VoxelEdit, VoxelQuery};
use voxeld::net::SenderId;
use voxeld::octal::OctalCode;
use voxeld::octree::EditMode;
use voxeld::server::VoxelServer;
use voxeld::util::unix_micros;

fn local_config() -> ServerConfig {
    ServerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        sweep_interval: Duration::from_millis(200),
        ..ServerConfig::default()
    }
}

fn query_packet(client: SenderId) -> Vec<u8> {
    packet::encode_query(&VoxelQuery {
        client,
        position: [0.0, 0.0, 0.0],
        orientation: [0.0, 0.0, 1.0],
        fov: 1.2,
        last_sequence: 0,
    })
}

fn edit_packet(sender: SenderId, code: &str, color: [u8; 3]) -> Vec<u8> {
    packet::encode_single_edit(
        &EditHeader {
            sequence: 1,
            sent_at_micros: unix_micros(),
            sender,
        },
        &VoxelEdit {
            mode: EditMode::Set,
            code: OctalCode::parse(code).unwrap(),
            color: Some(color),
        },
    )
}

/// Wait for a voxel-data packet mentioning `wanted`, giving up after
/// the deadline.
fn wait_for_voxel(socket: &UdpSocket, wanted: &OctalCode, deadline: Duration) -> bool {
    let started = Instant::now();
    let mut buf = [0u8; 2048];
    while started.elapsed() < deadline {
        match socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                if let Ok((_, _, records)) = packet::decode_voxel_data(&buf[..len]) {
                    if records.iter().any(|(code, _)| code == wanted) {
                        return true;
                    }
                }
            }
            Err(ref err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => return false,
        }
    }
    false
}

#[test]
#[serial]
fn edits_stream_back_to_a_querying_client() {
    let dir = tempdir().unwrap();
    let persist_path = dir.path().join("voxels.vxs");
    let mut config = local_config();
    config.persist = Some(PersistConfig {
        path: persist_path.clone(),
        interval: Duration::from_millis(100),
    });

    let mut server = VoxelServer::new(config).unwrap();
    let server_addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let handle = std::thread::spawn(move || server.run().unwrap());

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let id = SenderId([7u8; 16]);

    client.send_to(&query_packet(id), server_addr).unwrap();
    client
        .send_to(&edit_packet(id, "24", [200, 100, 50]), server_addr)
        .unwrap();

    let wanted = OctalCode::parse("24").unwrap();
    assert!(
        wait_for_voxel(&client, &wanted, Duration::from_secs(5)),
        "no voxel-data packet carried the edited code"
    );

    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    // Shutdown persists the final snapshot.
    assert!(persist_path.exists());
}

#[test]
#[serial]
fn malformed_and_stale_version_packets_are_ignored() {
    let mut server = VoxelServer::new(local_config()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let ctx = server.context();
    let handle = std::thread::spawn(move || server.run().unwrap());

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(b"", server_addr).unwrap();
    client.send_to(b"X\x02junk", server_addr).unwrap();
    // Right type byte, wrong protocol version.
    client.send_to(b"S\x01junk", server_addr).unwrap();

    let id = SenderId([9u8; 16]);
    client
        .send_to(&edit_packet(id, "3", [1, 2, 3]), server_addr)
        .unwrap();

    let code = OctalCode::parse("3").unwrap();
    let started = Instant::now();
    let mut applied = false;
    while started.elapsed() < Duration::from_secs(5) {
        let store = ctx.store.read().unwrap();
        if store.get(&code).is_some_and(|node| node.payload().is_some()) {
            applied = true;
            break;
        }
        drop(store);
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(applied, "valid edit was not applied");
    assert!(ctx.sessions.is_empty(), "garbage created a session");

    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}
