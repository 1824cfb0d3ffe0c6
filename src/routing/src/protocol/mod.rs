pub mod classic;
pub mod x;

use crate::error::Result;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;

/// Byte counters for one relayed connection (§4.6).
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayStats {
    pub bytes_up: u64,
    pub bytes_down: u64,
    /// Set when the backend's handshake reply was an error packet,
    /// i.e. the client's login was rejected. Classic protocol only.
    pub handshake_failed: bool,
}

const RELAY_BUFFER: usize = 16_384;

/// Steady-state raw byte relay shared by the classic and X protocol
/// handlers once their respective handshake phases are done (or a TLS
/// upgrade has taken packet inspection out of scope). `wait_timeout`
/// of zero blocks indefinitely; otherwise idling that long on both
/// directions closes the connection.
pub(crate) async fn relay_raw_bytes(
    mut client_r: OwnedReadHalf,
    mut client_w: OwnedWriteHalf,
    mut server_r: OwnedReadHalf,
    mut server_w: OwnedWriteHalf,
    wait_timeout: Duration,
    stop: &mut watch::Receiver<bool>,
    stats: &mut RelayStats,
) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut buf_up = vec![0u8; RELAY_BUFFER];
    let mut buf_down = vec![0u8; RELAY_BUFFER];
    loop {
        let idle = async {
            if wait_timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(wait_timeout).await
            }
        };
        tokio::select! {
            biased;
            _ = stop.changed() => {
                let _ = client_w.shutdown().await;
                let _ = server_w.shutdown().await;
                return Ok(());
            }
            res = client_r.read(&mut buf_up) => {
                let n = res?;
                if n == 0 {
                    let _ = server_w.shutdown().await;
                    let _ = client_w.shutdown().await;
                    return Ok(());
                }
                server_w.write_all(&buf_up[..n]).await?;
                stats.bytes_up += n as u64;
            }
            res = server_r.read(&mut buf_down) => {
                let n = res?;
                if n == 0 {
                    let _ = client_w.shutdown().await;
                    let _ = server_w.shutdown().await;
                    return Ok(());
                }
                client_w.write_all(&buf_down[..n]).await?;
                stats.bytes_down += n as u64;
            }
            _ = idle => {
                tracing::info!("wait timeout reached, closing connection");
                let _ = client_w.shutdown().await;
                let _ = server_w.shutdown().await;
                return Ok(());
            }
        }
    }
}
