//! UDP session: each datagram is already framed, one sentence per line.

use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use nmea_core::config::UdpConfig;

use super::{LinkState, SessionCtx, TransportEvent};

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65_507;

pub(crate) async fn bind(port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port)).await
}

/// Split a datagram into sentences: payload ends at the first NUL, each
/// non-blank line is one sentence.
pub(crate) fn split_datagram(payload: &[u8]) -> Vec<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end])
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) async fn run(ctx: SessionCtx, cfg: UdpConfig, socket: UdpSocket) {
    let recv_timeout = Duration::from_millis(cfg.recv_timeout_ms.max(1));
    let mut socket = Some(socket);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        if let Some(sock) = socket.take() {
            let mut datagrams: u64 = 0;
            loop {
                // The timeout is the cancellation checkpoint.
                if ctx.is_cancelled() {
                    debug!(port = cfg.port, datagrams, "udp listener stopped");
                    return;
                }
                match timeout(recv_timeout, sock.recv_from(&mut buf)).await {
                    Err(_elapsed) => continue,
                    Ok(Ok((len, from))) => {
                        datagrams += 1;
                        if datagrams == 1 {
                            info!(port = cfg.port, from = %from, "first udp datagram");
                        }
                        for sentence in split_datagram(&buf[..len]) {
                            ctx.ingest(&sentence);
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(port = cfg.port, error = %e, "udp receive failed");
                        ctx.emit(TransportEvent::Disconnected { kind: ctx.kind() });
                        break;
                    }
                }
            }
        }

        let Some(delay) = ctx.retry_delay() else {
            ctx.finish();
            return;
        };
        ctx.set_state(LinkState::Reconnecting);
        ctx.emit(TransportEvent::Reconnecting {
            kind: ctx.kind(),
            delay_ms: delay.as_millis() as u64,
        });
        tokio::select! {
            _ = ctx.cancel_token().cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if !ctx.is_current() {
            return;
        }

        ctx.set_state(LinkState::Connecting);
        ctx.count_attempt();
        match bind(cfg.port).await {
            Ok(s) => {
                ctx.set_state(LinkState::Connected);
                ctx.emit(TransportEvent::Connected {
                    kind: ctx.kind(),
                    detail: format!("udp port {}", cfg.port),
                });
                socket = Some(s);
            }
            Err(e) => {
                warn!(port = cfg.port, error = %e, "udp rebind failed");
                ctx.emit(TransportEvent::ConnectFailed {
                    kind: ctx.kind(),
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_datagram_stops_at_nul() {
        let mut payload = b"$GPHDT,1.0,T\r\n$GPHDT,2.0,T".to_vec();
        payload.extend_from_slice(&[0, 0, b'x', 0]);
        assert_eq!(
            split_datagram(&payload),
            vec!["$GPHDT,1.0,T", "$GPHDT,2.0,T"]
        );
    }

    #[test]
    fn test_split_datagram_blank() {
        assert!(split_datagram(b"\r\n  \n").is_empty());
        assert!(split_datagram(&[0, b'$']).is_empty());
    }
}
