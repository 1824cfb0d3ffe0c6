use router_routing::destination::round_robin::RoundRobin;
use router_routing::destination::RouteDestination;
use router_routing::{MySQLRouting, Protocol, TCPAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Spawns a tiny fake backend that speaks just enough classic-protocol
/// framing to clear the handshake, then echoes whatever it receives back
/// to the client, tagging each echoed chunk with its own port so the test
/// can tell which backend answered.
async fn spawn_fake_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // server greeting: payload len=1, seq=0, payload=[0x0a]
        sock.write_all(&[1, 0, 0, 0, 0x0a]).await.unwrap();
        // client handshake response (any seq, no SSL bit)
        let mut hdr = [0u8; 4];
        sock.read_exact(&mut hdr).await.unwrap();
        let len = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], 0]) as usize;
        let mut body = vec![0u8; len];
        sock.read_exact(&mut body).await.unwrap();
        // server OK packet marks handshake done (seq 2: greeting=0, client
        // handshake-response=1, this reply=2)
        sock.write_all(&[1, 0, 2, 0, 0x00]).await.unwrap();

        let mut buf = [0u8; 256];
        loop {
            match sock.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    let mut reply = format!("from:{port}:").into_bytes();
                    reply.extend_from_slice(&buf[..n]);
                    if sock.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    port
}

async fn classic_handshake(stream: &mut TcpStream) {
    let mut hdr = [0u8; 4];
    stream.read_exact(&mut hdr).await.unwrap();
    stream.write_all(&[0, 0, 0, 1]).await.unwrap();
    let mut ok = [0u8; 5];
    stream.read_exact(&mut ok).await.unwrap();
    assert_eq!(ok[4], 0x00);
}

#[tokio::test]
async fn round_robin_distributes_across_three_backends() {
    let mut ports = Vec::new();
    for _ in 0..3 {
        ports.push(spawn_fake_backend().await);
    }
    let destinations: Vec<TCPAddress> = ports
        .iter()
        .map(|p| TCPAddress::new("127.0.0.1", *p))
        .collect();
    let destination: Arc<dyn RouteDestination> = Arc::new(RoundRobin::new(destinations));

    let bind = TCPAddress::parse("127.0.0.1:0", 0).unwrap();
    let listener = TcpListener::bind(format!("{}:{}", bind.addr, bind.port))
        .await
        .unwrap();
    let bind_addr = listener.local_addr().unwrap();
    drop(listener);

    let routing = Arc::new(MySQLRouting::new(
        "test".to_string(),
        TCPAddress::new(bind_addr.ip().to_string(), bind_addr.port()),
        destination,
        Protocol::Classic,
        Duration::from_secs(1),
        Duration::from_secs(0),
        16,
    ));
    let (stop_tx, stop_rx) = watch::channel(false);
    let routing_clone = Arc::clone(&routing);
    let run_handle = tokio::spawn(async move {
        let _ = routing_clone.run(stop_rx).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut seen = std::collections::HashSet::new();
    for _ in 0..3 {
        let mut client = TcpStream::connect(bind_addr).await.unwrap();
        classic_handshake(&mut client).await;
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]);
        assert!(reply.starts_with("from:"));
        let port: u16 = reply
            .split(':')
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();
        seen.insert(port);
    }
    assert_eq!(seen.len(), 3, "round-robin should have visited all three backends");

    let _ = stop_tx.send(true);
    let _ = run_handle.await;
}
