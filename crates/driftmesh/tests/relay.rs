//! Two peers meeting through a real WebSocket relay on localhost.

#![cfg(feature = "websocket")]

use std::time::Duration;

use driftmesh::prelude::*;
use driftmesh::transport::RelayServer;
use tokio::time::timeout;

async fn relay_supervisor() -> SupervisorConfig {
    let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    SupervisorConfig {
        primary: TransportProfile::named("local-relay").with_pinned_host(format!("ws://{addr}")),
        ..SupervisorConfig::default()
    }
}

fn identity(name: &str) -> LocalIdentity {
    LocalIdentity {
        candidate: PeerId::from(name),
        username: name.to_string(),
        color: Color::from_rgb(200, 80, 40),
    }
}

#[tokio::test]
async fn test_spawn_relay_peers_converge() {
    let supervisor = relay_supervisor().await;
    let host = PeerBuilder::new()
        .identity(identity("host1"))
        .supervisor(supervisor.clone())
        .spawn_relay()
        .unwrap();
    let mut host_view = host.watch();
    timeout(Duration::from_secs(5), host_view.wait_for(|s| s.status == ConnectionStatus::Connected))
        .await
        .unwrap()
        .unwrap();

    let joiner = PeerBuilder::new()
        .identity(identity("join1"))
        .locator("https://mesh.example/space?p=host1")
        .supervisor(supervisor)
        .spawn_relay()
        .unwrap();

    let mut joiner_view = joiner.watch();
    let seen = timeout(Duration::from_secs(5), joiner_view.wait_for(|s| s.participants.len() == 2))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(seen.link_count, 1);
    timeout(Duration::from_secs(5), host_view.wait_for(|s| s.participants.len() == 2))
        .await
        .unwrap()
        .unwrap();

    joiner.shutdown().await.unwrap();
    host.shutdown().await.unwrap();
}
