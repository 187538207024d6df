//! Transport lifecycle for the serial, UDP and TCP feeds.
//!
//! Each kind owns one session slot. A session is identified by a number
//! that changes on every connect and teardown; workers check it before any
//! state write, so a superseded worker can never clobber its successor.
//!
//! "Connected" for the manager as a whole is derived from the slots on
//! every call, never stored.

mod serial;
mod tcp;
mod udp;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nmea_core::config::{Config, SerialConfig, TcpConfig, UdpConfig};

use crate::error::{Result, ServerError};
use crate::pipeline::SentencePipeline;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Udp,
    Tcp,
}

impl TransportKind {
    pub const ALL: [TransportKind; 3] = [TransportKind::Serial, TransportKind::Udp, TransportKind::Tcp];

    fn index(self) -> usize {
        match self {
            TransportKind::Serial => 0,
            TransportKind::Udp => 1,
            TransportKind::Tcp => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Serial => "serial",
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Some(TransportKind::Serial),
            "udp" => Some(TransportKind::Udp),
            "tcp" => Some(TransportKind::Tcp),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// What a session does after its link fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Never,
    After(Duration),
}

impl ReconnectPolicy {
    /// `0` means never.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            ReconnectPolicy::Never
        } else {
            ReconnectPolicy::After(Duration::from_secs(secs))
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::After(d) => Some(*d),
        }
    }
}

/// Operator notifications for the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    Connected { kind: TransportKind, detail: String },
    ConnectFailed { kind: TransportKind, error: String },
    Disconnected { kind: TransportKind },
    Reconnecting { kind: TransportKind, delay_ms: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    pub kind: TransportKind,
    pub enabled: bool,
    pub state: LinkState,
    pub session: u64,
    pub attempts: u64,
    pub reconnect_ms: Option<u64>,
}

/// Transport settings, one block per kind.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub serial: SerialConfig,
    pub udp: UdpConfig,
    pub tcp: TcpConfig,
}

impl TransportSettings {
    pub fn from_config(cfg: &Config) -> Self {
        TransportSettings {
            serial: cfg.serial.clone(),
            udp: cfg.udp.clone(),
            tcp: cfg.tcp.clone(),
        }
    }
}

enum Worker {
    Task(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

struct Slot {
    state: LinkState,
    /// 0 when no session is active.
    session: u64,
    attempts: u64,
    policy: ReconnectPolicy,
    cancel: Option<CancellationToken>,
    worker: Option<Worker>,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            state: LinkState::Disconnected,
            session: 0,
            attempts: 0,
            policy: ReconnectPolicy::Never,
            cancel: None,
            worker: None,
        }
    }
}

struct Shared {
    pipeline: Arc<SentencePipeline>,
    settings: TransportSettings,
    slots: Mutex<[Slot; 3]>,
    next_session: AtomicU64,
    desired: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Handle given to one session's worker.
#[derive(Clone)]
pub(crate) struct SessionCtx {
    kind: TransportKind,
    id: u64,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl SessionCtx {
    pub(crate) fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn is_current(&self) -> bool {
        self.shared.slots.lock()[self.kind.index()].session == self.id
    }

    /// Write the slot state if this session still owns it.
    pub(crate) fn set_state(&self, state: LinkState) -> bool {
        let mut slots = self.shared.slots.lock();
        let slot = &mut slots[self.kind.index()];
        if slot.session != self.id {
            return false;
        }
        slot.state = state;
        true
    }

    /// Mark the slot as down when this session ends on its own.
    pub(crate) fn finish(&self) {
        let mut slots = self.shared.slots.lock();
        let slot = &mut slots[self.kind.index()];
        if slot.session == self.id {
            slot.state = LinkState::Disconnected;
            slot.session = 0;
            slot.cancel = None;
        }
    }

    pub(crate) fn count_attempt(&self) {
        let mut slots = self.shared.slots.lock();
        let slot = &mut slots[self.kind.index()];
        if slot.session == self.id {
            slot.attempts += 1;
        }
    }

    /// Delay before the next attempt, or `None` when the session should end.
    pub(crate) fn retry_delay(&self) -> Option<Duration> {
        if !self.shared.desired.load(Ordering::SeqCst) || self.is_cancelled() {
            return None;
        }
        let slots = self.shared.slots.lock();
        let slot = &slots[self.kind.index()];
        if slot.session != self.id {
            return None;
        }
        slot.policy.delay()
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        self.shared.emit(event);
    }

    /// Feed one framed line to the pipeline. Parse errors are already values;
    /// a panic in a listener or sink is logged and the session keeps reading.
    pub(crate) fn ingest(&self, line: &str) {
        let pipeline = &self.shared.pipeline;
        if panic::catch_unwind(AssertUnwindSafe(|| pipeline.ingest(line))).is_err() {
            error!(kind = %self.kind, sentence = line, "sentence handling panicked");
        }
    }
}

/// Owns the three transport sessions. Cheap to clone.
#[derive(Clone)]
pub struct TransportManager {
    shared: Arc<Shared>,
}

impl TransportManager {
    pub fn new(pipeline: Arc<SentencePipeline>, settings: TransportSettings) -> Self {
        let mut slots: [Slot; 3] = Default::default();
        slots[TransportKind::Serial.index()].policy =
            ReconnectPolicy::from_secs(settings.serial.reconnect_secs);
        slots[TransportKind::Udp.index()].policy =
            ReconnectPolicy::from_secs(settings.udp.reconnect_secs);
        slots[TransportKind::Tcp.index()].policy =
            ReconnectPolicy::from_secs(settings.tcp.reconnect_secs);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        TransportManager {
            shared: Arc::new(Shared {
                pipeline,
                settings,
                slots: Mutex::new(slots),
                next_session: AtomicU64::new(1),
                desired: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn pipeline(&self) -> &Arc<SentencePipeline> {
        &self.shared.pipeline
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    pub fn set_policy(&self, kind: TransportKind, policy: ReconnectPolicy) {
        self.shared.slots.lock()[kind.index()].policy = policy;
    }

    pub fn policy(&self, kind: TransportKind) -> ReconnectPolicy {
        self.shared.slots.lock()[kind.index()].policy
    }

    pub fn is_enabled(&self, kind: TransportKind) -> bool {
        let s = &self.shared.settings;
        match kind {
            TransportKind::Serial => s.serial.enabled,
            TransportKind::Udp => s.udp.enabled,
            TransportKind::Tcp => s.tcp.enabled,
        }
    }

    pub fn state(&self, kind: TransportKind) -> LinkState {
        self.shared.slots.lock()[kind.index()].state
    }

    /// True while any transport is connected.
    pub fn is_connected(&self) -> bool {
        let slots = self.shared.slots.lock();
        slots.iter().any(|s| s.state == LinkState::Connected)
    }

    pub fn is_desired(&self) -> bool {
        self.shared.desired.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Vec<TransportStatus> {
        let slots = self.shared.slots.lock();
        TransportKind::ALL
            .iter()
            .map(|&kind| {
                let slot = &slots[kind.index()];
                TransportStatus {
                    kind,
                    enabled: self.is_enabled(kind),
                    state: slot.state,
                    session: slot.session,
                    attempts: slot.attempts,
                    reconnect_ms: slot.policy.delay().map(|d| d.as_millis() as u64),
                }
            })
            .collect()
    }

    /// Connect every enabled transport. Failures of one kind don't stop the
    /// others.
    pub async fn connect(&self) -> Vec<(TransportKind, Result<()>)> {
        self.shared.desired.store(true, Ordering::SeqCst);
        let mut results = Vec::new();
        for kind in TransportKind::ALL {
            if self.is_enabled(kind) {
                results.push((kind, self.connect_kind(kind).await));
            }
        }
        results
    }

    /// Start a fresh session for one kind, tearing down the previous one
    /// first.
    pub async fn connect_kind(&self, kind: TransportKind) -> Result<()> {
        if !self.is_enabled(kind) {
            return Err(ServerError::Disabled(kind.as_str()));
        }
        self.shared.desired.store(true, Ordering::SeqCst);
        self.teardown(kind).await;
        let ctx = self.claim_slot(kind);
        let id = ctx.id;

        let settings = &self.shared.settings;
        let worker = match kind {
            TransportKind::Serial => {
                let cfg = settings.serial.clone();
                let open_cfg = cfg.clone();
                let opened = tokio::task::spawn_blocking(move || serial::open(&open_cfg))
                    .await
                    .map_err(|e| ServerError::Io(std::io::Error::other(e)))
                    .and_then(|r| r);
                match opened {
                    Ok(port) => {
                        ctx.set_state(LinkState::Connected);
                        info!(device = %cfg.device, baud = cfg.baud, "serial connected");
                        ctx.emit(TransportEvent::Connected {
                            kind,
                            detail: format!("{} @ {}", cfg.device, cfg.baud),
                        });
                        match serial::spawn(ctx.clone(), cfg, port) {
                            Ok(handle) => Worker::Thread(handle),
                            Err(e) => return Err(self.fail(&ctx, e.into())),
                        }
                    }
                    Err(e) => return Err(self.fail(&ctx, e)),
                }
            }
            TransportKind::Udp => {
                let cfg = settings.udp.clone();
                match udp::bind(cfg.port).await {
                    Ok(socket) => {
                        ctx.set_state(LinkState::Connected);
                        info!(port = cfg.port, "udp listening");
                        ctx.emit(TransportEvent::Connected {
                            kind,
                            detail: format!("udp port {}", cfg.port),
                        });
                        Worker::Task(tokio::spawn(udp::run(ctx, cfg, socket)))
                    }
                    Err(e) => return Err(self.fail(&ctx, e.into())),
                }
            }
            TransportKind::Tcp => {
                let cfg = settings.tcp.clone();
                Worker::Task(tokio::spawn(tcp::run(ctx, cfg)))
            }
        };

        let mut slots = self.shared.slots.lock();
        let slot = &mut slots[kind.index()];
        if slot.session == id {
            slot.worker = Some(worker);
        }
        Ok(())
    }

    /// Install a new session in a kind's slot.
    ///
    /// Two concurrent connects can both finish teardown before either
    /// installs; whoever installs second cancels the session it displaces,
    /// so no worker outlives its slot.
    fn claim_slot(&self, kind: TransportKind) -> SessionCtx {
        let id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let displaced = {
            let mut slots = self.shared.slots.lock();
            let slot = &mut slots[kind.index()];
            slot.session = id;
            slot.state = LinkState::Connecting;
            slot.attempts += 1;
            // A displaced worker exits on its cancelled token; its handle is
            // dropped rather than awaited under the lock.
            slot.worker = None;
            slot.cancel.replace(cancel.clone())
        };
        if let Some(old) = displaced {
            warn!(kind = %kind, "connect raced with another; cancelling the older session");
            old.cancel();
        }
        SessionCtx {
            kind,
            id,
            cancel,
            shared: Arc::clone(&self.shared),
        }
    }

    fn fail(&self, ctx: &SessionCtx, error: ServerError) -> ServerError {
        warn!(kind = %ctx.kind, error = %error, "connect failed");
        ctx.finish();
        ctx.emit(TransportEvent::ConnectFailed {
            kind: ctx.kind,
            error: error.to_string(),
        });
        error
    }

    /// Stop one kind. Repeated calls are no-ops.
    pub async fn disconnect_kind(&self, kind: TransportKind) {
        if self.teardown(kind).await {
            info!(kind = %kind, "transport disconnected");
            self.shared.emit(TransportEvent::Disconnected { kind });
        }
    }

    /// Stop everything and clear the desired-connected flag.
    pub async fn disconnect(&self) {
        self.shared.desired.store(false, Ordering::SeqCst);
        for kind in TransportKind::ALL {
            self.disconnect_kind(kind).await;
        }
    }

    /// Cancel the current session of a kind and wait for its worker to exit.
    /// Returns true when a session was active.
    async fn teardown(&self, kind: TransportKind) -> bool {
        let (cancel, worker) = {
            let mut slots = self.shared.slots.lock();
            let slot = &mut slots[kind.index()];
            let active = slot.session != 0 || slot.cancel.is_some();
            slot.session = 0;
            slot.state = LinkState::Disconnected;
            let cancel = slot.cancel.take();
            let worker = slot.worker.take();
            if !active && worker.is_none() {
                return false;
            }
            (cancel, worker)
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        match worker {
            Some(Worker::Task(handle)) => {
                let _ = handle.await;
            }
            Some(Worker::Thread(handle)) => {
                let _ = tokio::task::spawn_blocking(move || handle.join()).await;
            }
            None => {}
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::pipeline;
    use nmea_core::config::Config;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};
    use tokio::time::{sleep, timeout, Instant};

    fn settings() -> TransportSettings {
        let config = Config::default();
        let mut s = TransportSettings {
            serial: config.serial,
            udp: config.udp,
            tcp: config.tcp,
        };
        s.udp.enabled = false;
        s
    }

    fn manager(settings: TransportSettings) -> TransportManager {
        TransportManager::new(Arc::new(pipeline()), settings)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn free_udp_port() -> u16 {
        let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        s.local_addr().unwrap().port()
    }

    #[test]
    fn test_policy_from_secs() {
        assert_eq!(ReconnectPolicy::from_secs(0), ReconnectPolicy::Never);
        assert_eq!(
            ReconnectPolicy::from_secs(5).delay(),
            Some(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_default_policies_keep_asymmetry() {
        let m = manager(settings());
        assert_eq!(m.policy(TransportKind::Serial), ReconnectPolicy::Never);
        assert_eq!(m.policy(TransportKind::Udp), ReconnectPolicy::Never);
        assert_eq!(
            m.policy(TransportKind::Tcp),
            ReconnectPolicy::After(Duration::from_secs(5))
        );
        assert!(!m.is_connected());
    }

    #[tokio::test]
    async fn test_disabled_kind_rejected() {
        let m = manager(settings());
        assert!(matches!(
            m.connect_kind(TransportKind::Udp).await,
            Err(ServerError::Disabled("udp"))
        ));
    }

    #[tokio::test]
    async fn test_serial_open_failure_stays_disconnected() {
        let mut s = settings();
        s.serial.enabled = true;
        s.serial.device = "/dev/does-not-exist-nmea".into();
        let m = manager(s);
        let mut events = m.subscribe();

        assert!(m.connect_kind(TransportKind::Serial).await.is_err());
        assert_eq!(m.state(TransportKind::Serial), LinkState::Disconnected);
        assert!(!m.is_connected());
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::ConnectFailed {
                kind: TransportKind::Serial,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_udp_session_ingests_and_disconnects() {
        let mut s = settings();
        s.udp.enabled = true;
        s.udp.port = free_udp_port().await;
        s.udp.recv_timeout_ms = 100;
        let port = s.udp.port;
        let m = manager(s);

        m.connect_kind(TransportKind::Udp).await.unwrap();
        assert_eq!(m.state(TransportKind::Udp), LinkState::Connected);
        assert!(m.is_connected());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut datagram = b"$A-TLL,01,123,4567,N,00987,6543,W,VESSEL1,,,\r\n".to_vec();
        datagram.extend_from_slice(&[0u8; 16]);
        sender
            .send_to(&datagram, ("127.0.0.1", port))
            .await
            .unwrap();

        let db = Arc::clone(m.pipeline().dispatcher().db());
        assert!(wait_for(|| db.get("VESSEL1").is_some()).await);

        m.disconnect().await;
        assert_eq!(m.state(TransportKind::Udp), LinkState::Disconnected);
        assert!(!m.is_connected());
        // Idempotent.
        m.disconnect().await;
        assert!(!m.is_connected());
    }

    #[tokio::test]
    async fn test_udp_bind_conflict_reported() {
        let holder = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let mut s = settings();
        s.udp.enabled = true;
        s.udp.port = holder.local_addr().unwrap().port();
        let m = manager(s);

        assert!(m.connect_kind(TransportKind::Udp).await.is_err());
        assert_eq!(m.state(TransportKind::Udp), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnecting_one_kind_leaves_others() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut s = settings();
        s.udp.enabled = true;
        s.udp.port = free_udp_port().await;
        s.udp.recv_timeout_ms = 100;
        s.tcp.enabled = true;
        s.tcp.port = listener.local_addr().unwrap().port();
        let m = manager(s);

        m.connect().await;
        let (_conn, _) = listener.accept().await.unwrap();
        assert!(wait_for(|| m.state(TransportKind::Tcp) == LinkState::Connected).await);

        m.disconnect_kind(TransportKind::Tcp).await;
        assert_eq!(m.state(TransportKind::Tcp), LinkState::Disconnected);
        assert_eq!(m.state(TransportKind::Udp), LinkState::Connected);
        assert!(m.is_connected());
        m.disconnect().await;
    }

    #[tokio::test]
    async fn test_tcp_streams_through_framer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut s = settings();
        s.tcp.enabled = true;
        s.tcp.port = listener.local_addr().unwrap().port();
        let m = manager(s);

        m.connect_kind(TransportKind::Tcp).await.unwrap();
        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(b"$A-TLL,01,123,45").await.unwrap();
        conn.flush().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        conn.write_all(b"67,N,00987,6543,W,VESSEL1,,,\r\n$GPHDT,274.07,T*03\r\n")
            .await
            .unwrap();

        let db = Arc::clone(m.pipeline().dispatcher().db());
        assert!(wait_for(|| db.get("VESSEL1").is_some() && db.get("own-ship").is_some()).await);
        m.disconnect().await;
    }

    #[tokio::test]
    async fn test_tcp_failure_schedules_one_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut s = settings();
        s.tcp.enabled = true;
        s.tcp.port = listener.local_addr().unwrap().port();
        let m = manager(s);
        m.set_policy(
            TransportKind::Tcp,
            ReconnectPolicy::After(Duration::from_millis(300)),
        );
        let mut events = m.subscribe();

        m.connect_kind(TransportKind::Tcp).await.unwrap();
        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        // Exactly one new connection arrives after the backoff.
        let started = Instant::now();
        let (_second, _) = timeout(Duration::from_secs(3), listener.accept())
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(timeout(Duration::from_millis(600), listener.accept())
            .await
            .is_err());

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            seen.push(ev);
        }
        let reconnects = seen
            .iter()
            .filter(|e| matches!(e, TransportEvent::Reconnecting { .. }))
            .count();
        assert_eq!(reconnects, 1);
        m.disconnect().await;
    }

    #[tokio::test]
    async fn test_back_to_back_failures_never_overlap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut s = settings();
        s.tcp.enabled = true;
        s.tcp.port = listener.local_addr().unwrap().port();
        let m = manager(s);
        m.set_policy(
            TransportKind::Tcp,
            ReconnectPolicy::After(Duration::from_millis(200)),
        );

        // (accepted at, peer closed at) per server-side connection.
        let spans: Arc<parking_lot::Mutex<Vec<(Instant, Option<Instant>)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let server = {
            let spans = Arc::clone(&spans);
            tokio::spawn(async move {
                loop {
                    let Ok((mut conn, _)) = listener.accept().await else {
                        break;
                    };
                    let idx = {
                        let mut s = spans.lock();
                        s.push((Instant::now(), None));
                        s.len() - 1
                    };
                    let spans = Arc::clone(&spans);
                    tokio::spawn(async move {
                        // Fail the session quickly, then wait for the client
                        // to close its end.
                        sleep(Duration::from_millis(20)).await;
                        let _ = conn.shutdown().await;
                        let mut buf = [0u8; 64];
                        while let Ok(n) = conn.read(&mut buf).await {
                            if n == 0 {
                                break;
                            }
                        }
                        spans.lock()[idx].1 = Some(Instant::now());
                    });
                }
            })
        };

        m.connect_kind(TransportKind::Tcp).await.unwrap();
        // A second connect while the first session is live tears it down first.
        m.connect_kind(TransportKind::Tcp).await.unwrap();
        sleep(Duration::from_millis(1100)).await;
        m.disconnect().await;
        sleep(Duration::from_millis(100)).await;
        server.abort();

        let spans = spans.lock().clone();
        assert!((2..=8).contains(&spans.len()), "accepted {}", spans.len());
        let slack = Duration::from_millis(50);
        for pair in spans.windows(2) {
            let closed = pair[0].1.expect("client closed its end");
            assert!(closed <= pair[1].0 + slack, "sessions overlapped");
        }
        assert_eq!(m.state(TransportKind::Tcp), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_claiming_a_live_slot_cancels_the_displaced_session() {
        let mut s = settings();
        s.udp.enabled = true;
        let m = manager(s);

        let first = m.claim_slot(TransportKind::Udp);
        let second = m.claim_slot(TransportKind::Udp);

        assert!(first.is_cancelled());
        assert!(!first.is_current());
        assert!(!second.is_cancelled());
        assert!(second.is_current());
        assert!(!first.set_state(LinkState::Connected));

        m.teardown(TransportKind::Udp).await;
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_udp_session_survives_non_utf8_and_garbage() {
        let mut s = settings();
        s.udp.enabled = true;
        s.udp.port = free_udp_port().await;
        s.udp.recv_timeout_ms = 100;
        let port = s.udp.port;
        let m = manager(s);
        m.connect_kind(TransportKind::Udp).await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for junk in [
            &b"$\xffB,1\r\n"[..],
            &b"!\xfe\xfe,\x80\r\n$\xc3\r\n"[..],
            &b"\xff\xff\xff"[..],
            &b"$GPTLL,02,NaN,N,00987.6543,W,BAD,,,\r\n"[..],
        ] {
            sender.send_to(junk, ("127.0.0.1", port)).await.unwrap();
        }
        sender
            .send_to(
                b"$A-TLL,01,123,4567,N,00987,6543,W,VESSEL1,,,\r\n",
                ("127.0.0.1", port),
            )
            .await
            .unwrap();

        let db = Arc::clone(m.pipeline().dispatcher().db());
        assert!(wait_for(|| db.get("VESSEL1").is_some()).await);
        assert!(db.get("BAD").is_none());
        assert_eq!(m.state(TransportKind::Udp), LinkState::Connected);
        assert!(m.pipeline().stats().parse_errors >= 4);
        m.disconnect().await;
    }

    #[tokio::test]
    async fn test_tcp_connect_failure_without_desired_flag_stops() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut s = settings();
        s.tcp.enabled = true;
        s.tcp.port = port;
        s.tcp.reconnect_secs = 0;
        let m = manager(s);
        let mut events = m.subscribe();

        m.connect_kind(TransportKind::Tcp).await.unwrap();
        assert!(matches!(
            timeout(Duration::from_secs(3), events.recv()).await.unwrap().unwrap(),
            TransportEvent::ConnectFailed { .. }
        ));
        assert!(wait_for(|| m.state(TransportKind::Tcp) == LinkState::Disconnected).await);
        assert_eq!(m.status()[2].session, 0);
    }
}
