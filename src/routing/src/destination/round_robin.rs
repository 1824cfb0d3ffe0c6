use super::{connect_with_timeout, Quarantine, RouteDestination};
use crate::address::TCPAddress;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

/// Atomically advances `cursor` modulo `destinations.len()`, skipping
/// (and, on connect failure, quarantining) unreachable entries until one
/// succeeds or the whole list has been tried once.
///
/// Shared by [`RoundRobin`] (where `quarantine` persists across calls) and
/// the metadata-cache destination (where the candidate list is rebuilt
/// fresh every call, so quarantine would be redundant — callers pass
/// `None` there, per §4.5.4 step 3).
pub(crate) async fn pick(
    destinations: &[TCPAddress],
    cursor: &AtomicUsize,
    quarantine: Option<&Quarantine>,
    connect_timeout: Duration,
) -> Result<(TcpStream, TCPAddress)> {
    if destinations.is_empty() {
        return Err(Error::Connection("destination list is empty".to_string()));
    }
    for _ in 0..destinations.len() {
        let idx = cursor.fetch_add(1, Ordering::Relaxed) % destinations.len();
        if let Some(q) = quarantine {
            if q.is_quarantined(idx) {
                continue;
            }
        }
        let addr = &destinations[idx];
        match connect_with_timeout(addr, connect_timeout).await {
            Ok(stream) => return Ok((stream, addr.clone())),
            Err(_) => {
                if let Some(q) = quarantine {
                    q.add_to_quarantine(idx);
                }
            }
        }
    }
    Err(Error::Connection("round-robin exhausted all destinations".to_string()))
}

pub struct RoundRobin {
    destinations: Vec<TCPAddress>,
    quarantine: Quarantine,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(destinations: Vec<TCPAddress>) -> Self {
        Self { destinations, quarantine: Quarantine::new(), cursor: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl RouteDestination for RoundRobin {
    async fn get_server_socket(&self, connect_timeout: Duration) -> Result<(TcpStream, TCPAddress)> {
        self.cleanup_quarantine().await;
        pick(&self.destinations, &self.cursor, Some(&self.quarantine), connect_timeout).await
    }

    async fn cleanup_quarantine(&self) {
        self.quarantine.cleanup_quarantine(&self.destinations).await;
    }

    fn strategy_name(&self) -> &'static str {
        "round-robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cursor_advances_modulo_len() {
        let cursor = AtomicUsize::new(0);
        let dests = vec![TCPAddress::new("a", 1), TCPAddress::new("b", 2), TCPAddress::new("c", 3)];
        // every connect fails (nothing is listening); still exercises that
        // the cursor visits each index once per call before giving up.
        for _ in 0..3 {
            let _ = pick(&dests, &cursor, None, Duration::from_millis(20)).await;
        }
        assert_eq!(cursor.load(Ordering::Relaxed) % dests.len(), 0);
    }
}
