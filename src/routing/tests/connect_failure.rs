use router_routing::destination::round_robin::RoundRobin;
use router_routing::destination::RouteDestination;
use router_routing::{MySQLRouting, Protocol, TCPAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

async fn bind_routing(destination: Arc<dyn RouteDestination>, protocol: Protocol) -> (Arc<MySQLRouting>, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bind_addr = listener.local_addr().unwrap();
    drop(listener);

    let routing = Arc::new(MySQLRouting::new(
        "test".to_string(),
        TCPAddress::new(bind_addr.ip().to_string(), bind_addr.port()),
        destination,
        protocol,
        Duration::from_millis(100),
        Duration::from_secs(0),
        16,
    ));
    (routing, bind_addr)
}

/// No backend reachable at all: the client should see a synthetic error
/// packet instead of a silently-dropped socket.
#[tokio::test]
async fn classic_sends_error_packet_when_no_backend_reachable() {
    // nothing listens on this port
    let unreachable = TCPAddress::new("127.0.0.1", 1);
    let destination: Arc<dyn RouteDestination> = Arc::new(RoundRobin::new(vec![unreachable]));
    let (routing, bind_addr) = bind_routing(destination, Protocol::Classic).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let routing_clone = Arc::clone(&routing);
    let run_handle = tokio::spawn(async move {
        let _ = routing_clone.run(stop_rx).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(bind_addr).await.unwrap();
    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert!(n > 4, "expected an error packet, got {n} bytes");
    assert_eq!(buf[4], 0xff, "expected an ERR marker byte");

    let _ = stop_tx.send(true);
    let _ = run_handle.await;
}

#[tokio::test]
async fn x_protocol_sends_error_message_when_no_backend_reachable() {
    let unreachable = TCPAddress::new("127.0.0.1", 1);
    let destination: Arc<dyn RouteDestination> = Arc::new(RoundRobin::new(vec![unreachable]));
    let (routing, bind_addr) = bind_routing(destination, Protocol::X).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let routing_clone = Arc::clone(&routing);
    let run_handle = tokio::spawn(async move {
        let _ = routing_clone.run(stop_rx).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(bind_addr).await.unwrap();
    let mut buf = [0u8; 128];
    let n = client.read(&mut buf).await.unwrap();
    assert!(n > 5, "expected an error message, got {n} bytes");
    assert_eq!(buf[4], 1, "expected X Protocol ERROR message type");

    let _ = stop_tx.send(true);
    let _ = run_handle.await;
}
