use super::round_robin::pick;
use crate::address::TCPAddress;
use crate::error::Result;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::net::TcpStream;

/// §4.5.3: round-robin over `secondaries`; if none is reachable, falls
/// back to round-robin over `primaries`. Only meaningful for the
/// metadata-cache-backed destination, where both lists are rebuilt fresh
/// on every call — quarantine is not used here either.
pub async fn pick_with_fallback(
    secondaries: &[TCPAddress],
    primaries: &[TCPAddress],
    cursor: &AtomicUsize,
    connect_timeout: Duration,
) -> Result<(TcpStream, TCPAddress)> {
    if !secondaries.is_empty() {
        if let Ok(result) = pick(secondaries, cursor, None, connect_timeout).await {
            return Ok(result);
        }
    }
    pick(primaries, cursor, None, connect_timeout).await
}
