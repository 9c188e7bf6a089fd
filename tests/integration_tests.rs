//! Integration tests for the replication layer
//!
//! These tests run real servers and clients over loopback UDP sockets on
//! ephemeral ports and check behaviour across crate boundaries.

use client::config::ClientConfig;
use client::game::GameWorld;
use client::manager::NetworkManager;
use client::network::Client;
use client::reconcile::{EntityStore, Reconciler};
use server::config::ServerConfig;
use server::network::Server;
use shared::{ProtocolMode, RequestChannel};
use std::thread;
use std::time::{Duration, Instant};

fn start_server(config: ServerConfig) -> Server {
    let mut server = Server::new(config);
    server.start().expect("server should start on loopback");
    server
}

fn client_config(server: &Server) -> ClientConfig {
    ClientConfig::for_ports(
        server.config().mode,
        server.request_addr().unwrap().port(),
        server.broadcast_addr().map_or(0, |a| a.port()),
    )
}

fn requester(server: &Server) -> RequestChannel {
    RequestChannel::connect(server.request_addr().unwrap(), Duration::from_secs(1)).unwrap()
}

/// Retries `check` until it passes or three seconds go by
fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use shared::{Frame, FrameKind};
    use std::net::UdpSocket;

    /// Tests that replies echo the request sequence over a raw socket
    #[test]
    fn reply_echoes_request_sequence() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        let request = Frame::new(FrameKind::Request, 77, "CONNECT");
        socket
            .send_to(&request.encode().unwrap(), server.request_addr().unwrap())
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        let reply = Frame::decode(&buf[..len]).unwrap();

        assert_eq!(reply.kind, FrameKind::Reply);
        assert_eq!(reply.sequence, 77);
        assert_eq!(reply.body, "CONNECTED 1 0.0 0.0");
    }

    /// Tests the full command set against a live server
    #[test]
    fn every_command_gets_one_reply() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));
        let mut channel = requester(&server);

        assert_eq!(channel.request("CONNECT").unwrap(), "CONNECTED 1 0.0 0.0");
        assert_eq!(channel.request("POSITION 1 2.5 -1.0").unwrap(), "OK");
        assert_eq!(
            channel.request("UPDATE_AND_GET_STATE 1 2.5 -1.0").unwrap(),
            "OK 1 2.5 -1.0"
        );
        assert_eq!(channel.request("DISCONNECT 1").unwrap(), "DISCONNECTED");
        assert_eq!(channel.request("UPDATE_AND_GET_STATE 1 0 0").unwrap(), "OK");
    }
}

/// SESSION TABLE TESTS
mod session_tests {
    use server::session::SessionTable;
    use std::sync::Arc;
    use std::thread;

    /// Tests that snapshots stay consistent while writers hammer the table
    #[test]
    fn snapshots_consistent_under_concurrent_writers() {
        let table = Arc::new(SessionTable::new(64));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let id = table.connect().unwrap();
                    for step in 0..1000 {
                        table.update_position(id, step as f32, id as f32);
                    }
                    id
                })
            })
            .collect();

        let reader = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let snapshot = table.snapshot();
                    assert!(snapshot.windows(2).all(|w| w[0].id < w[1].id));
                    assert!(snapshot.len() <= 4);
                }
            })
        };

        let mut ids: Vec<u32> = writers.into_iter().map(|w| w.join().unwrap()).collect();
        reader.join().unwrap();
        ids.sort_unstable();

        assert_eq!(ids, vec![1, 2, 3, 4]);
        for state in table.snapshot() {
            assert_eq!(state.x, 999.0);
            assert_eq!(state.y, state.id as f32);
        }
    }
}

/// END-TO-END POLLING TESTS
mod polling_tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Tests the two-client scenario at the protocol level
    #[test]
    fn raw_two_client_scenario() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));
        let mut a = requester(&server);
        let mut b = requester(&server);

        assert_eq!(a.request("CONNECT").unwrap(), "CONNECTED 1 0.0 0.0");
        assert_eq!(b.request("CONNECT").unwrap(), "CONNECTED 2 0.0 0.0");
        assert_eq!(a.request("POSITION 1 5.0 3.0").unwrap(), "OK");
        assert_eq!(
            b.request("UPDATE_AND_GET_STATE 2 0 0").unwrap(),
            "OK 1 5.0 3.0 2 0.0 0.0"
        );
    }

    /// Tests handshake, self-filtering and reconciliation through real clients
    #[test]
    fn clients_replicate_and_reconcile() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));
        let a = Client::new(client_config(&server));
        let b = Client::new(client_config(&server));

        assert!(a.connect("127.0.0.1"));
        assert!(b.connect("127.0.0.1"));
        assert_eq!(a.client_id(), 1);
        assert_eq!(b.client_id(), 2);
        assert_eq!(a.spawn_position(), Some((0.0, 0.0)));

        a.send_position(5.0, 3.0);
        a.update();
        b.update();

        assert!(!b.other_clients().contains_key(&2));
        assert!(!a.other_clients().contains_key(&1));

        let others = b.other_clients();
        assert_eq!(others.len(), 1);
        assert_approx_eq!(others[&1].x, 5.0);
        assert_approx_eq!(others[&1].y, 3.0);

        let mut world = GameWorld::new();
        let mut reconciler = Reconciler::new(b.client_id());
        let report = reconciler.apply(&others, &mut world);
        assert_eq!(report.created, vec![1]);
        assert_eq!(world.remote_entities().count(), 1);

        let entity = reconciler.entity_for(1).unwrap();
        assert_eq!(world.position(entity), Some((5.0, 3.0)));

        // Same snapshot again: nothing new
        assert!(reconciler.apply(&b.other_clients(), &mut world).is_empty());

        a.disconnect();
        assert!(!a.is_connected());

        assert!(eventually(|| {
            b.update();
            b.other_clients().is_empty()
        }));

        let report = reconciler.apply(&b.other_clients(), &mut world);
        assert_eq!(report.removed, vec![1]);
        assert!(reconciler.apply(&b.other_clients(), &mut world).is_empty());
        assert_eq!(world.remote_entities().count(), 0);
        assert_eq!(server.client_count(), 1);
    }

    /// Tests the manager facade with its own network thread
    #[test]
    fn network_managers_see_each_other() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));

        let mut world_a = GameWorld::new();
        let mut world_b = GameWorld::new();
        let mut a = NetworkManager::new(client_config(&server));
        let mut b = NetworkManager::new(client_config(&server));

        assert!(a.connect("127.0.0.1"));
        assert!(b.connect("127.0.0.1"));

        let player_a = world_a.spawn_player(0.0, 0.0);
        a.set_local_entity(player_a);
        b.set_local_entity(world_b.spawn_player(0.0, 0.0));

        world_a.set_position(player_a, 40.0, 20.0);

        assert!(eventually(|| {
            a.sync(&mut world_a);
            b.sync(&mut world_b);
            b.entity_for(a.client_id())
                .and_then(|e| world_b.position(e))
                == Some((40.0, 20.0))
        }));

        // The local player is never touched by reconciliation
        assert_eq!(world_a.position(player_a), Some((40.0, 20.0)));

        a.disconnect(&mut world_a);
        assert_eq!(world_a.remote_entities().count(), 0);

        assert!(eventually(|| {
            b.sync(&mut world_b);
            world_b.remote_entities().count() == 0
        }));
        b.disconnect(&mut world_b);
    }

    /// Tests that connecting an already connected manager keeps its peers bound
    #[test]
    fn second_connect_keeps_peer_entities() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));
        let mut peer = requester(&server);
        assert_eq!(peer.request("CONNECT").unwrap(), "CONNECTED 1 0.0 0.0");
        assert_eq!(peer.request("POSITION 1 7.0 7.0").unwrap(), "OK");

        let mut world = GameWorld::new();
        let mut manager = NetworkManager::new(client_config(&server));
        assert!(manager.connect("127.0.0.1"));
        assert!(eventually(|| {
            manager.sync(&mut world);
            manager.entity_for(1).is_some()
        }));
        let entity = manager.entity_for(1);
        let client_id = manager.client_id();

        assert!(manager.connect("127.0.0.1"));
        assert_eq!(manager.client_id(), client_id);
        assert_eq!(server.client_count(), 2);

        for _ in 0..10 {
            manager.sync(&mut world);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.entity_for(1), entity);
        assert_eq!(world.remote_entities().count(), 1);

        manager.disconnect(&mut world);
    }

    /// Tests that a crashed client eventually drops out of everyone's view
    #[test]
    fn silent_client_is_evicted() {
        let server = start_server(ServerConfig {
            stale_timeout: Some(Duration::from_millis(300)),
            eviction_interval: Duration::from_millis(20),
            ..ServerConfig::loopback(ProtocolMode::Polling)
        });

        let mut crashed = requester(&server);
        assert_eq!(crashed.request("CONNECT").unwrap(), "CONNECTED 1 0.0 0.0");

        let survivor = Client::new(client_config(&server));
        assert!(survivor.connect("127.0.0.1"));

        assert!(eventually(|| {
            survivor.update();
            survivor.other_clients().contains_key(&1)
        }));
        assert!(eventually(|| {
            survivor.update();
            !survivor.other_clients().contains_key(&1)
        }));
        assert!(survivor.is_connected());
    }
}

/// END-TO-END BROADCAST TESTS
mod broadcast_tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Tests movement and departure through the publish channel
    #[test]
    fn positions_and_departures_are_published() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Broadcast));

        let mut world_a = GameWorld::new();
        let mut world_b = GameWorld::new();
        let mut a = NetworkManager::new(client_config(&server));
        let mut b = NetworkManager::new(client_config(&server));

        assert!(a.connect("127.0.0.1"));
        assert!(b.connect("127.0.0.1"));

        let player_a = world_a.spawn_player(0.0, 0.0);
        a.set_local_entity(player_a);

        world_a.set_position(player_a, 5.0, 3.0);
        assert!(eventually(|| {
            a.sync(&mut world_a);
            b.sync(&mut world_b);
            b.other_clients()
                .get(&1)
                .map_or(false, |peer| peer.x == 5.0 && peer.y == 3.0)
        }));

        b.sync(&mut world_b);
        let entity = b.entity_for(1).unwrap();
        let (x, y) = world_b.position(entity).unwrap();
        assert_approx_eq!(x, 5.0);
        assert_approx_eq!(y, 3.0);
        assert!(!b.other_clients().contains_key(&2));

        a.disconnect(&mut world_a);
        assert!(eventually(|| {
            b.sync(&mut world_b);
            b.entity_for(1).is_none()
        }));
        assert_eq!(world_b.remote_entities().count(), 0);
    }

    /// Tests that a late joiner learns where an idle peer stands
    #[test]
    fn late_joiner_sees_idle_peer() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Broadcast));

        let mut early = requester(&server);
        assert_eq!(early.request("CONNECT").unwrap(), "CONNECTED 1 0.0 0.0");
        assert_eq!(early.request("POSITION 1 12.0 8.0").unwrap(), "OK");

        // Let the broadcast loop publish (and forget) the move first
        thread::sleep(Duration::from_millis(100));

        let late = Client::new(client_config(&server));
        assert!(late.connect("127.0.0.1"));

        assert!(eventually(|| {
            late.update();
            late.other_clients()
                .get(&1)
                .map_or(false, |peer| peer.x == 12.0 && peer.y == 8.0)
        }));
    }
}

/// MALFORMED TRAFFIC AND CAPACITY TESTS
mod malformed_traffic_tests {
    use super::*;
    use serde::Serialize;
    use shared::{Frame, FrameKind};
    use std::net::UdpSocket;

    #[derive(Serialize)]
    struct NotAFrame {
        marker: u64,
        payload: Vec<u8>,
    }

    /// Tests that bad text gets an ERROR reply and changes nothing
    #[test]
    fn malformed_position_is_rejected() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));
        let mut channel = requester(&server);

        assert_eq!(channel.request("CONNECT").unwrap(), "CONNECTED 1 0.0 0.0");
        let before = server.sessions().snapshot();

        assert_eq!(
            channel.request("POSITION abc xyz").unwrap(),
            "ERROR Invalid position format"
        );
        assert_eq!(
            channel.request("DANCE 1").unwrap(),
            "ERROR Unknown command: DANCE"
        );
        assert_eq!(server.sessions().snapshot(), before);
    }

    /// Tests that an undecodable datagram is dropped and service continues
    #[test]
    fn garbage_datagram_is_ignored() {
        let server = start_server(ServerConfig::loopback(ProtocolMode::Polling));
        let addr = server.request_addr().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        let garbage = bincode::serialize(&NotAFrame {
            marker: u64::MAX,
            payload: vec![0xAB; 16],
        })
        .unwrap();
        socket.send_to(&garbage, addr).unwrap();

        let request = Frame::new(FrameKind::Request, 5, "CONNECT");
        socket.send_to(&request.encode().unwrap(), addr).unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        let reply = Frame::decode(&buf[..len]).unwrap();
        assert_eq!(reply.sequence, 5);
        assert_eq!(reply.body, "CONNECTED 1 0.0 0.0");
        assert_eq!(server.client_count(), 1);
    }

    /// Tests that a full server turns clients away
    #[test]
    fn full_server_refuses_client() {
        let server = start_server(ServerConfig {
            max_clients: 1,
            ..ServerConfig::loopback(ProtocolMode::Polling)
        });

        let first = Client::new(client_config(&server));
        let second = Client::new(client_config(&server));

        assert!(first.connect("127.0.0.1"));
        assert!(!second.connect("127.0.0.1"));
        assert!(!second.is_connected());
        assert_eq!(second.client_id(), 0);
        assert_eq!(server.client_count(), 1);
    }

    /// Tests that a client with no server fails instead of hanging
    #[tokio::test]
    async fn connect_without_server_fails_within_timeout() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let result = tokio::task::spawn_blocking(move || {
            let client = Client::new(ClientConfig {
                request_timeout: Duration::from_millis(200),
                ..ClientConfig::for_ports(ProtocolMode::Polling, port, 0)
            });
            let start = Instant::now();
            (client.connect("127.0.0.1"), start.elapsed())
        })
        .await
        .unwrap();

        assert!(!result.0);
        assert!(result.1 < Duration::from_secs(1));
        drop(silent);
    }
}
