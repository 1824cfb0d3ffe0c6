pub mod metadata_cache;
pub mod next_available;
pub mod round_robin;
pub mod round_robin_fallback;

use crate::address::TCPAddress;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;

/// A thread-safe ordered sequence of candidate backends, with a separate
/// quarantine set guarded by its own mutex (§4.5).
pub struct Quarantine {
    quarantined: Mutex<HashSet<usize>>,
}

impl Quarantine {
    pub fn new() -> Self {
        Self { quarantined: Mutex::new(HashSet::new()) }
    }

    pub fn is_quarantined(&self, index: usize) -> bool {
        self.quarantined.lock().contains(&index)
    }

    /// Duplicates are no-ops.
    pub fn add_to_quarantine(&self, index: usize) {
        self.quarantined.lock().insert(index);
    }

    /// Probes quarantined indices with a short connect; removes those that
    /// now succeed. Called opportunistically at the start of
    /// `get_server_socket` and periodically by the refresh thread.
    pub async fn cleanup_quarantine(&self, destinations: &[TCPAddress]) {
        let candidates: Vec<usize> = self.quarantined.lock().iter().copied().collect();
        for index in candidates {
            let Some(addr) = destinations.get(index) else { continue };
            if connect_with_timeout(addr, Duration::from_millis(250)).await.is_ok() {
                self.quarantined.lock().remove(&index);
            }
        }
    }
}

impl Default for Quarantine {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn connect_with_timeout(addr: &TCPAddress, connect_timeout: Duration) -> Result<TcpStream> {
    let target = format!("{}:{}", addr.addr, addr.port);
    match tokio::time::timeout(connect_timeout, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::Connection(format!("connect to {target} failed: {e}"))),
        Err(_) => Err(Error::Connection(format!("connect to {target} timed out"))),
    }
}

/// Returns a connected socket to the strategy-chosen member, or an error
/// on exhaustion.
#[async_trait]
pub trait RouteDestination: Send + Sync {
    async fn get_server_socket(&self, connect_timeout: Duration) -> Result<(TcpStream, TCPAddress)>;

    /// Runs quarantine cleanup; a no-op for destinations (like the
    /// metadata-cache-backed one) that don't use a quarantine set.
    async fn cleanup_quarantine(&self) {}

    /// Short label for the selection strategy in effect, used in startup
    /// logging and in tests that need to tell destinations apart without
    /// downcasting the trait object.
    fn strategy_name(&self) -> &'static str;
}
