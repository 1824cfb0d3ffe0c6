use super::{relay_raw_bytes, RelayStats};
use crate::error::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

const HEADER_LEN: usize = 4;
const CLIENT_SSL_CAPABILITY: u16 = 0x0800;

async fn read_packet<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16;
    let mut raw = Vec::with_capacity(HEADER_LEN + len);
    raw.extend_from_slice(&header);
    raw.resize(HEADER_LEN + len, 0);
    stream.read_exact(&mut raw[HEADER_LEN..]).await?;
    Ok(raw)
}

fn seq_id(raw: &[u8]) -> u8 {
    raw[3]
}

fn requests_ssl(raw: &[u8]) -> bool {
    if raw.len() < HEADER_LEN + 2 {
        return false;
    }
    let caps = u16::from_le_bytes([raw[HEADER_LEN], raw[HEADER_LEN + 1]]);
    caps & CLIENT_SSL_CAPABILITY != 0
}

/// Builds a classic-protocol ERR packet with the given sequence id,
/// MySQL error code, SQLSTATE, and message.
fn error_packet(seq: u8, code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut payload = vec![0xffu8]; // ERR marker
    payload.extend_from_slice(&code.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(sql_state.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    let len = payload.len();
    let mut raw = Vec::with_capacity(HEADER_LEN + len);
    raw.push((len & 0xff) as u8);
    raw.push(((len >> 8) & 0xff) as u8);
    raw.push(((len >> 16) & 0xff) as u8);
    raw.push(seq);
    raw.extend_from_slice(&payload);
    raw
}

/// Builds a synthetic ERR packet used when a client host has been
/// blocked after too many handshake failures: rather than opening a
/// real backend connection, the router answers as if a login had been
/// attempted and rejected.
pub fn blocked_host_error_packet(seq: u8, message: &str) -> Vec<u8> {
    error_packet(seq, 1045, "28000", message) // ER_ACCESS_DENIED_ERROR
}

/// Builds the ERR packet sent to the client, in place of a server
/// greeting, when no backend could be reached for this connection.
pub fn connect_failure_error_packet(message: &str) -> Vec<u8> {
    error_packet(0, 2003, "HY000", message) // CR_CONN_HOST_ERROR-equivalent
}

/// Relays one classic-protocol connection (§4.6). The server speaks
/// first; packet sequence ids are validated until the client requests a
/// TLS upgrade (ends inspection) or the server answers the client's
/// handshake response with OK/ERR (ends the handshake phase cleanly).
pub async fn relay_classic(
    client: TcpStream,
    server: TcpStream,
    wait_timeout: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<RelayStats> {
    let (mut client_r, mut client_w) = client.into_split();
    let (mut server_r, mut server_w) = server.into_split();
    let mut stats = RelayStats::default();

    let greeting = read_packet(&mut server_r).await?;
    client_w.write_all(&greeting).await?;
    stats.bytes_down += greeting.len() as u64;
    let mut curr_pktnr = seq_id(&greeting);

    let mut handshake_done = false;
    loop {
        if handshake_done {
            break;
        }

        let response = read_packet(&mut client_r).await?;
        let expected = curr_pktnr.wrapping_add(1);
        if seq_id(&response) != expected {
            return Err(Error::Connection(format!(
                "unexpected sequence id {} during handshake (expected {expected})",
                seq_id(&response)
            )));
        }
        curr_pktnr = seq_id(&response);
        server_w.write_all(&response).await?;
        stats.bytes_up += response.len() as u64;

        if requests_ssl(&response) {
            // client is upgrading to TLS: the rest of this connection is
            // opaque to us, stop inspecting packet numbers entirely.
            break;
        }

        let reply = read_packet(&mut server_r).await?;
        let expected = curr_pktnr.wrapping_add(1);
        if seq_id(&reply) != expected {
            return Err(Error::Connection(format!(
                "unexpected sequence id {} during handshake (expected {expected})",
                seq_id(&reply)
            )));
        }
        curr_pktnr = seq_id(&reply);
        client_w.write_all(&reply).await?;
        stats.bytes_down += reply.len() as u64;

        match reply.get(HEADER_LEN).copied() {
            Some(0x00) => handshake_done = true,
            Some(0xff) => {
                handshake_done = true;
                stats.handshake_failed = true;
            }
            _ => {}
        }
    }

    relay_raw_bytes(client_r, client_w, server_r, server_w, wait_timeout, &mut stop, &mut stats).await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_capability_bit_detected() {
        let mut raw = vec![0u8; HEADER_LEN + 4];
        raw[HEADER_LEN] = 0x00;
        raw[HEADER_LEN + 1] = 0x08;
        assert!(requests_ssl(&raw));
    }

    #[test]
    fn blocked_host_packet_is_err_marker() {
        let raw = blocked_host_error_packet(1, "Host is blocked");
        assert_eq!(raw[HEADER_LEN], 0xff);
        assert_eq!(raw[3], 1);
    }

    #[test]
    fn connect_failure_packet_is_err_marker_at_seq_zero() {
        let raw = connect_failure_error_packet("no backend available");
        assert_eq!(raw[HEADER_LEN], 0xff);
        assert_eq!(raw[3], 0);
    }
}
