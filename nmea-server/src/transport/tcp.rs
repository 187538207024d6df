//! TCP client session with in-task reconnect.
//!
//! Connect, read and backoff all happen inside one task, so a session can
//! never have two links open at once. A disconnect cancels the token, which
//! drops the socket and ends the pending read immediately.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use nmea_core::config::TcpConfig;
use nmea_core::framer::SentenceFramer;

use super::{LinkState, SessionCtx, TransportEvent};

enum LinkEnd {
    Cancelled,
    Eof,
    Failed(std::io::Error),
}

pub(crate) async fn run(ctx: SessionCtx, cfg: TcpConfig) {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let mut first_attempt = true;

    loop {
        if !first_attempt {
            ctx.count_attempt();
        }
        first_attempt = false;
        ctx.set_state(LinkState::Connecting);

        let connected = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return,
            r = TcpStream::connect(&addr) => r,
        };

        match connected {
            Ok(stream) => {
                if !ctx.set_state(LinkState::Connected) {
                    return;
                }
                info!(addr = %addr, "tcp connected");
                ctx.emit(TransportEvent::Connected {
                    kind: ctx.kind(),
                    detail: addr.clone(),
                });

                match read_loop(&ctx, stream).await {
                    LinkEnd::Cancelled => return,
                    LinkEnd::Eof => info!(addr = %addr, "tcp peer closed the connection"),
                    LinkEnd::Failed(e) => warn!(addr = %addr, error = %e, "tcp read failed"),
                }
                ctx.emit(TransportEvent::Disconnected { kind: ctx.kind() });
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "tcp connect failed");
                ctx.emit(TransportEvent::ConnectFailed {
                    kind: ctx.kind(),
                    error: e.to_string(),
                });
            }
        }

        let Some(delay) = ctx.retry_delay() else {
            ctx.finish();
            return;
        };
        if !ctx.set_state(LinkState::Reconnecting) {
            return;
        }
        ctx.emit(TransportEvent::Reconnecting {
            kind: ctx.kind(),
            delay_ms: delay.as_millis() as u64,
        });
        tokio::select! {
            _ = ctx.cancel_token().cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if !ctx.is_current() || ctx.retry_delay().is_none() {
            ctx.finish();
            return;
        }
    }
}

async fn read_loop(ctx: &SessionCtx, mut stream: TcpStream) -> LinkEnd {
    let mut framer = SentenceFramer::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return LinkEnd::Cancelled,
            r = stream.read(&mut buf) => r,
        };
        match n {
            Ok(0) => {
                if let Some(tail) = framer.finish() {
                    ctx.ingest(&tail);
                }
                return LinkEnd::Eof;
            }
            Ok(n) => {
                for sentence in framer.push_bytes(&buf[..n]) {
                    ctx.ingest(&sentence);
                }
            }
            Err(e) => return LinkEnd::Failed(e),
        }
    }
}
