//! TCP Integration Tests
//!
//! Runs three relays and the application server on real loopback sockets,
//! discovering each other through a file-backed directory, the same way the
//! binary runs them as separate processes.
//!
//! Run with: cargo test --test integration_tcp

use onionrelay_core::app::ApplicationServer;
use onionrelay_core::cell::RequestType;
use onionrelay_core::client::{ClientConfig, OnionClient};
use onionrelay_core::crypto::HeaderScheme;
use onionrelay_core::directory::{Directory, FileDirectory};
use onionrelay_core::privacy::PaddingConfig;
use onionrelay_core::relay::{RelayConfig, RelayContext, RelayService};
use onionrelay_core::transport::{serve, TcpTransport};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn bind() -> (TcpListener, SocketAddrV4) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        other => panic!("expected IPv4 address, got {}", other),
    };
    (listener, addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_over_tcp_with_file_directory() {
    let dir = tempdir().unwrap();
    let transport = Arc::new(TcpTransport::new(Duration::from_secs(5)));

    // Step 1: Application server
    let (server_listener, server_addr) = bind().await;
    let (server_shutdown, server_rx) = watch::channel(false);
    let server_task = tokio::spawn(serve(
        server_listener,
        Arc::new(ApplicationServer::default()),
        server_rx,
    ));

    // Step 2: Three relays sharing the directory folder
    let config = RelayConfig {
        header_scheme: HeaderScheme::X25519,
        padding: PaddingConfig {
            enabled: false,
            ..PaddingConfig::default()
        },
        ..RelayConfig::default()
    };
    let mut services = Vec::new();
    for i in 0..3 {
        let (listener, addr) = bind().await;
        let ctx = RelayContext::new(
            format!("tcp-relay-{}", i),
            config.generate_identity().unwrap(),
            addr,
            Arc::new(FileDirectory::open(dir.path()).unwrap()),
            transport.clone(),
            config.clone(),
        )
        .unwrap();
        let mut service = RelayService::start(Arc::new(ctx)).await.unwrap();
        service.serve_tcp(listener);
        services.push(service);
    }

    let directory = Arc::new(FileDirectory::open(dir.path()).unwrap());
    assert_eq!(directory.list().await.unwrap().len(), 3);

    // Step 3: Client request through the circuit
    let mut client_config = ClientConfig::new(server_addr);
    client_config.circuit_id = Some(1000);
    let mut client = OnionClient::new(directory.clone(), transport.clone(), client_config).unwrap();

    let reply = client.request(RequestType::Echo, b"ping").await.unwrap();
    assert_eq!(reply, b"pong");

    let reply = client.request(RequestType::RandomNumbers, b"3").await.unwrap();
    let text = String::from_utf8(reply).unwrap();
    assert!(text.starts_with("N-Random Numbers: "));
    println!("{}", text);

    // Step 4: Teardown
    client.destroy().await.unwrap();
    for service in &services {
        assert_eq!(service.context().table.load(), 0);
    }
    for service in services {
        service.shutdown().await;
    }
    assert!(directory.list().await.unwrap().is_empty());

    server_shutdown.send(true).unwrap();
    server_task.await.unwrap().unwrap();
}
