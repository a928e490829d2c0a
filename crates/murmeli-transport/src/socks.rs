//! Minimal SOCKS5 client: no-auth CONNECT by domain name.
//!
//! Tor only needs the domain form (RFC 1928 ATYP 0x03) so that `.onion`
//! names are resolved inside the proxy.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::{PeerId, TransportError};

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Ask the proxy on `stream` to connect to `host:port` on behalf of `peer`.
pub(crate) async fn connect(
    stream: &mut TcpStream,
    peer: &PeerId,
    host: &str,
    port: u16,
) -> Result<(), TransportError> {
    let io_err = |source| TransportError::Connect {
        peer: peer.clone(),
        source,
    };
    let refused = |reason: String| TransportError::Socks {
        peer: peer.clone(),
        reason,
    };

    if host.len() > u8::MAX as usize {
        return Err(refused(format!("host name too long: {} bytes", host.len())));
    }

    stream
        .write_all(&[VERSION, 1, NO_AUTH])
        .await
        .map_err(io_err)?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(io_err)?;
    if choice != [VERSION, NO_AUTH] {
        return Err(refused(format!("unsupported auth method {:#04x}", choice[1])));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(io_err)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(io_err)?;
    if head[0] != VERSION {
        return Err(refused(format!("bad reply version {:#04x}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(refused(reply_reason(head[1]).to_string()));
    }

    // Drain the bound address; its value is irrelevant to us.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(io_err)?;
            len[0] as usize
        }
        other => return Err(refused(format!("bad address type {other:#04x}"))),
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await.map_err(io_err)?;
    Ok(())
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "ttl expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
