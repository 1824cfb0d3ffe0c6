use super::{relay_raw_bytes, RelayStats};
use crate::error::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

const HEADER_LEN: usize = 4;
const MAX_HANDSHAKE_MESSAGE: usize = 1_048_576;

const CLIENT_CON_CAPABILITIES_SET: u8 = 2;
const SERVER_SESS_AUTHENTICATE_OK: u8 = 4;
const SERVER_ERROR: u8 = 1;

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Appends a protobuf length-delimited string field.
fn put_string_field(out: &mut Vec<u8>, field: u8, value: &str) {
    out.push((field << 3) | 2);
    put_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

/// Appends a protobuf varint field (values used here always fit one byte).
fn put_varint_field(out: &mut Vec<u8>, field: u8, value: u8) {
    out.push(field << 3);
    out.push(value);
}

/// Hand-rolls a minimal `Mysqlx.Error` message (code, sql_state, msg) the
/// same way `requests_tls` hand-scans a `CapabilitiesSet` instead of
/// pulling in a protobuf decoder: there is no backend connection to
/// negotiate a real error against, so this is the best-effort wire-level
/// equivalent used only when no backend could be reached at all.
pub fn connect_failure_error_message(message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    put_varint_field(&mut body, 2, 1); // code (field 2): generic
    put_string_field(&mut body, 4, "HY000"); // sql_state (field 4)
    put_string_field(&mut body, 3, message); // msg (field 3)

    let mut payload = vec![SERVER_ERROR];
    payload.extend_from_slice(&body);
    let len = (payload.len() as u32).to_le_bytes();
    let mut raw = Vec::with_capacity(HEADER_LEN + payload.len());
    raw.extend_from_slice(&len);
    raw.extend_from_slice(&payload);
    raw
}

async fn read_message<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<(Vec<u8>, u8)> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    let mut raw = Vec::with_capacity(HEADER_LEN + len);
    raw.extend_from_slice(&header);
    raw.resize(HEADER_LEN + len, 0);
    stream.read_exact(&mut raw[HEADER_LEN..]).await?;
    let msg_type = raw.get(HEADER_LEN).copied().unwrap_or(0);
    Ok((raw, msg_type))
}

/// Best-effort scan for a truthy `tls` capability inside a serialized
/// `Mysqlx.Connection.CapabilitiesSet` message: avoids pulling in a full
/// protobuf decoder for a single boolean. Accepts the bool, signed, and
/// unsigned scalar encodings the wire format allows for a capability
/// value.
fn requests_tls(body: &[u8]) -> bool {
    let needle = b"tls";
    let mut i = 0;
    while i + needle.len() <= body.len() {
        if &body[i..i + needle.len()] == needle {
            let tail = &body[i + needle.len()..];
            return tail.iter().take(8).any(|&b| b != 0);
        }
        i += 1;
    }
    false
}

/// Relays one X Protocol connection (§4.6). Handshake completion is
/// marked by the server's `SESS_AUTHENTICATE_OK`; a client
/// `CON_CAPABILITIES_SET` requesting `tls` ends message inspection the
/// same way a classic-protocol SSLRequest does, since the channel turns
/// opaque once TLS begins.
pub async fn relay_x(
    client: TcpStream,
    server: TcpStream,
    wait_timeout: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<RelayStats> {
    let (mut client_r, mut client_w) = client.into_split();
    let (mut server_r, mut server_w) = server.into_split();
    let mut stats = RelayStats::default();

    let mut handshake_done = false;
    let mut client_tls = false;

    while !handshake_done && !client_tls {
        tokio::select! {
            biased;
            _ = stop.changed() => {
                return Ok(stats);
            }
            msg = read_message(&mut client_r) => {
                let (raw, msg_type) = msg?;
                if raw.len() > MAX_HANDSHAKE_MESSAGE {
                    return Err(Error::Connection("oversized message during handshake".to_string()));
                }
                if msg_type == CLIENT_CON_CAPABILITIES_SET && requests_tls(&raw[HEADER_LEN + 1..]) {
                    client_tls = true;
                }
                server_w.write_all(&raw).await?;
                stats.bytes_up += raw.len() as u64;
            }
            msg = read_message(&mut server_r), if !client_tls => {
                let (raw, msg_type) = msg?;
                client_w.write_all(&raw).await?;
                stats.bytes_down += raw.len() as u64;
                if msg_type == SERVER_SESS_AUTHENTICATE_OK {
                    handshake_done = true;
                }
            }
        }
    }

    relay_raw_bytes(client_r, client_w, server_r, server_w, wait_timeout, &mut stop, &mut stats).await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_capability_detected_when_value_nonzero() {
        let mut body = b"tls".to_vec();
        body.push(1);
        assert!(requests_tls(&body));
    }

    #[test]
    fn tls_capability_absent_when_not_present() {
        assert!(!requests_tls(b"compression"));
    }

    #[test]
    fn connect_failure_message_carries_error_type_and_text() {
        let raw = connect_failure_error_message("no backend available");
        assert_eq!(raw[HEADER_LEN], SERVER_ERROR);
        let body = &raw[HEADER_LEN + 1..];
        let needle = b"no backend available";
        assert!(body.windows(needle.len()).any(|w| w == needle));
    }
}
