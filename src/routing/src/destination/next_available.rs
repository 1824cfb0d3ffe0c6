use super::{connect_with_timeout, Quarantine, RouteDestination};
use crate::address::TCPAddress;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

/// Fail-forward strategy (§4.5.1): once A->B->C have been walked, the
/// cursor never rewinds even after A recovers. Deliberately not "fixed"
/// to auto-recover — a recovered backend re-enters rotation only once
/// every entry ahead of it has also failed and the cursor wraps.
pub struct NextAvailable {
    destinations: Vec<TCPAddress>,
    quarantine: Quarantine,
    cursor: Mutex<usize>,
    exhausted: AtomicBool,
}

impl NextAvailable {
    pub fn new(destinations: Vec<TCPAddress>) -> Self {
        Self {
            destinations,
            quarantine: Quarantine::new(),
            cursor: Mutex::new(0),
            exhausted: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RouteDestination for NextAvailable {
    async fn get_server_socket(&self, connect_timeout: Duration) -> Result<(TcpStream, TCPAddress)> {
        if self.exhausted.load(Ordering::Relaxed) {
            return Err(Error::Connection("destination list exhausted".to_string()));
        }
        self.cleanup_quarantine().await;
        loop {
            let idx = *self.cursor.lock();
            let Some(addr) = self.destinations.get(idx) else {
                self.exhausted.store(true, Ordering::Relaxed);
                return Err(Error::Connection("destination list exhausted".to_string()));
            };
            match connect_with_timeout(addr, connect_timeout).await {
                Ok(stream) => return Ok((stream, addr.clone())),
                Err(_) => {
                    self.quarantine.add_to_quarantine(idx);
                    let mut cursor = self.cursor.lock();
                    if *cursor == idx {
                        *cursor += 1;
                    }
                }
            }
        }
    }

    async fn cleanup_quarantine(&self) {
        self.quarantine.cleanup_quarantine(&self.destinations).await;
    }

    fn strategy_name(&self) -> &'static str {
        "next-available"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausts_and_never_rewinds() {
        // no listeners bound on these ports: every connect attempt fails,
        // which exercises the advance-and-never-rewind path.
        let dests = vec![
            TCPAddress::new("127.0.0.1", 1),
            TCPAddress::new("127.0.0.1", 2),
        ];
        let strategy = NextAvailable::new(dests);
        assert!(strategy.get_server_socket(Duration::from_millis(50)).await.is_err());
        assert!(strategy.exhausted.load(Ordering::Relaxed));
        assert!(strategy.get_server_socket(Duration::from_millis(50)).await.is_err());
    }
}
