//! Serial port session: blocking reads on a dedicated OS thread.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use tracing::{info, warn};

use nmea_core::config::{Parity, SerialConfig};
use nmea_core::framer::SentenceFramer;

use super::{LinkState, SessionCtx, TransportEvent};
use crate::error::Result;

/// Port read timeout; also how often the worker looks at its cancel token.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) fn open(cfg: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    let data_bits = match cfg.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let stop_bits = match cfg.stop_bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    };
    let parity = match cfg.parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    };

    let port = serialport::new(&cfg.device, cfg.baud)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(port)
}

pub(crate) fn spawn(
    ctx: SessionCtx,
    cfg: SerialConfig,
    port: Box<dyn SerialPort>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("nmea-serial".into())
        .spawn(move || run(ctx, cfg, port))
}

fn run(ctx: SessionCtx, cfg: SerialConfig, port: Box<dyn SerialPort>) {
    let mut port = Some(port);
    loop {
        if let Some(p) = port.take() {
            match read_loop(&ctx, p) {
                Ok(()) => return,
                Err(e) => {
                    warn!(device = %cfg.device, error = %e, "serial read failed");
                    ctx.emit(TransportEvent::Disconnected { kind: ctx.kind() });
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
        if !sleep_unless_cancelled(&ctx, delay) || !ctx.is_current() {
            return;
        }

        ctx.set_state(LinkState::Connecting);
        ctx.count_attempt();
        match open(&cfg) {
            Ok(p) => {
                ctx.set_state(LinkState::Connected);
                info!(device = %cfg.device, "serial reopened");
                ctx.emit(TransportEvent::Connected {
                    kind: ctx.kind(),
                    detail: format!("{} @ {}", cfg.device, cfg.baud),
                });
                port = Some(p);
            }
            Err(e) => {
                warn!(device = %cfg.device, error = %e, "serial reopen failed");
                ctx.emit(TransportEvent::ConnectFailed {
                    kind: ctx.kind(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Read until cancelled (Ok) or the port fails (Err). The port is closed
/// when dropped on return.
fn read_loop(ctx: &SessionCtx, mut port: Box<dyn SerialPort>) -> std::io::Result<()> {
    let mut framer = SentenceFramer::new();
    let mut buf = [0u8; 1024];
    while !ctx.is_cancelled() {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                for sentence in framer.push_bytes(&buf[..n]) {
                    ctx.ingest(&sentence);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Returns false when cancelled during the wait.
fn sleep_unless_cancelled(ctx: &SessionCtx, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if ctx.is_cancelled() {
            return false;
        }
        thread::sleep(READ_TIMEOUT.min(deadline.saturating_duration_since(Instant::now())));
    }
    !ctx.is_cancelled()
}
