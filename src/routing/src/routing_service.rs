use crate::address::TCPAddress;
use crate::destination::RouteDestination;
use crate::error::{Error, Result};
use crate::protocol::classic::{blocked_host_error_packet, connect_failure_error_packet, relay_classic};
use crate::protocol::x::{connect_failure_error_message, relay_x};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Classic,
    X,
}

/// Consecutive handshake failures from the same client host before the
/// router starts rejecting it outright instead of relaying to a backend
/// (§4.6 "error injection on block").
const BLOCK_AFTER_HANDSHAKE_ERRORS: u32 = 4;

/// One `[routing:<key>]` instance: an accept loop that hands each
/// connection to `destination` and relays it with the configured
/// protocol (§4.6).
pub struct MySQLRouting {
    pub name: String,
    bind_address: TCPAddress,
    destination: Arc<dyn RouteDestination>,
    protocol: Protocol,
    destination_connect_timeout: Duration,
    wait_timeout: Duration,
    max_connections: usize,
    active_routes: Arc<AtomicUsize>,
    host_errors: Mutex<HashMap<IpAddr, u32>>,
}

impl MySQLRouting {
    pub fn new(
        name: String,
        bind_address: TCPAddress,
        destination: Arc<dyn RouteDestination>,
        protocol: Protocol,
        destination_connect_timeout: Duration,
        wait_timeout: Duration,
        max_connections: usize,
    ) -> Self {
        Self {
            name,
            bind_address,
            destination,
            protocol,
            destination_connect_timeout,
            wait_timeout,
            max_connections,
            active_routes: Arc::new(AtomicUsize::new(0)),
            host_errors: Mutex::new(HashMap::new()),
        }
    }

    fn is_blocked(&self, ip: IpAddr) -> bool {
        self.host_errors.lock().get(&ip).copied().unwrap_or(0) >= BLOCK_AFTER_HANDSHAKE_ERRORS
    }

    fn record_host_error(&self, ip: IpAddr) {
        *self.host_errors.lock().entry(ip).or_insert(0) += 1;
    }

    fn clear_host_errors(&self, ip: IpAddr) {
        self.host_errors.lock().remove(&ip);
    }

    pub fn active_routes(&self) -> usize {
        self.active_routes.load(Ordering::Relaxed)
    }

    /// Binds and accepts until `stop` fires. Backlog is left at the
    /// platform default since tokio's `TcpListener` does not expose one.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> Result<()> {
        let bind = format!("{}:{}", self.bind_address.addr, self.bind_address.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| Error::Connection(format!("bind {bind} failed: {e}")))?;
        tracing::info!(route = %self.name, %bind, "routing started");

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => {
                    tracing::info!(route = %self.name, "routing stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(route = %self.name, error = %e, "accept failed");
                            continue;
                        }
                    };
                    self.dispatch(socket, peer, &stop);
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, socket: TcpStream, peer: SocketAddr, stop: &watch::Receiver<bool>) {
        if self.active_routes.load(Ordering::Relaxed) >= self.max_connections {
            tracing::warn!(route = %self.name, %peer, max_connections = self.max_connections, "rejecting connection: max_connections reached");
            metrics::counter!("router_routing_connections_rejected_total", "route" => self.name.clone()).increment(1);
            return;
        }
        let _ = socket.set_nodelay(true);
        self.active_routes.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("router_routing_active_connections", "route" => self.name.clone())
            .set(self.active_routes.load(Ordering::Relaxed) as f64);
        let this = Arc::clone(self);
        let stop_rx = stop.clone();
        tokio::spawn(async move {
            this.handle_connection(socket, peer, stop_rx).await;
            let remaining = this.active_routes.fetch_sub(1, Ordering::Relaxed) - 1;
            metrics::gauge!("router_routing_active_connections", "route" => this.name.clone()).set(remaining as f64);
        });
    }

    async fn handle_connection(&self, mut client: TcpStream, peer: SocketAddr, stop: watch::Receiver<bool>) {
        if self.protocol == Protocol::Classic && self.is_blocked(peer.ip()) {
            tracing::warn!(route = %self.name, %peer, "rejecting connection: host blocked after repeated handshake errors");
            let packet = blocked_host_error_packet(0, "Host is blocked because of many connection errors");
            let _ = client.write_all(&packet).await;
            return;
        }

        let (server, server_addr) = match self.destination.get_server_socket(self.destination_connect_timeout).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(route = %self.name, %peer, error = %e, "no backend available");
                let message = format!("no backend available for route '{}'", self.name);
                let packet = match self.protocol {
                    Protocol::Classic => connect_failure_error_packet(&message),
                    Protocol::X => connect_failure_error_message(&message),
                };
                let _ = client.write_all(&packet).await;
                return;
            }
        };
        let _ = server.set_nodelay(true);
        tracing::debug!(route = %self.name, %peer, backend = %server_addr, "connection routed");

        let result = match self.protocol {
            Protocol::Classic => relay_classic(client, server, self.wait_timeout, stop).await,
            Protocol::X => relay_x(client, server, self.wait_timeout, stop).await,
        };
        match result {
            Ok(stats) => {
                metrics::counter!("router_routing_bytes_up_total", "route" => self.name.clone()).increment(stats.bytes_up);
                metrics::counter!("router_routing_bytes_down_total", "route" => self.name.clone()).increment(stats.bytes_down);
                tracing::debug!(
                    route = %self.name, %peer,
                    bytes_up = stats.bytes_up, bytes_down = stats.bytes_down,
                    "connection closed"
                );
                if self.protocol == Protocol::Classic {
                    if stats.handshake_failed {
                        self.record_host_error(peer.ip());
                    } else {
                        self.clear_host_errors(peer.ip());
                    }
                }
            }
            Err(e) => tracing::warn!(route = %self.name, %peer, error = %e, "connection relay failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::next_available::NextAvailable;

    fn routing() -> MySQLRouting {
        let destination: Arc<dyn RouteDestination> = Arc::new(NextAvailable::new(vec![TCPAddress::new("127.0.0.1", 3306)]));
        MySQLRouting::new(
            "test".to_string(),
            TCPAddress::new("127.0.0.1", 0),
            destination,
            Protocol::Classic,
            Duration::from_secs(1),
            Duration::from_secs(0),
            16,
        )
    }

    #[test]
    fn host_is_blocked_only_after_threshold_errors() {
        let r = routing();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        for _ in 0..BLOCK_AFTER_HANDSHAKE_ERRORS - 1 {
            r.record_host_error(ip);
            assert!(!r.is_blocked(ip));
        }
        r.record_host_error(ip);
        assert!(r.is_blocked(ip));
    }

    #[test]
    fn clearing_host_errors_unblocks() {
        let r = routing();
        let ip: IpAddr = "10.0.0.6".parse().unwrap();
        for _ in 0..BLOCK_AFTER_HANDSHAKE_ERRORS {
            r.record_host_error(ip);
        }
        assert!(r.is_blocked(ip));
        r.clear_host_errors(ip);
        assert!(!r.is_blocked(ip));
    }
}
