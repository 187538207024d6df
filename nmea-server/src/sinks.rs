//! Output side effects for framed sentences: retransmission to control
//! station peers and the verbatim raw log.
//!
//! Both are best effort. Callers log failures and carry on.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;

use parking_lot::Mutex;

use nmea_core::config::Peer;
use nmea_core::now;

use crate::error::{Result, ServerError};

/// Forwards a raw sentence to one named peer system.
pub trait RetransmitSink: Send + Sync {
    /// Names of the peers currently known to the sink.
    fn peers(&self) -> Vec<String>;
    fn send(&self, sentence: &str, destination: &str) -> Result<()>;
}

/// Append-only raw sentence log.
pub trait RawLog: Send + Sync {
    fn log_raw(&self, sentence: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// UDP retransmission
// ---------------------------------------------------------------------------

/// Fire-and-forget datagram per peer, one sentence per datagram
/// terminated by CRLF.
pub struct UdpRetransmitSink {
    socket: UdpSocket,
    peers: HashMap<String, SocketAddr>,
}

impl UdpRetransmitSink {
    pub fn new(peers: &[Peer]) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let mut resolved = HashMap::new();
        for peer in peers {
            let addr = peer
                .addr
                .to_socket_addrs()
                .ok()
                .and_then(|mut a| a.next())
                .ok_or_else(|| ServerError::Address(peer.addr.clone()))?;
            resolved.insert(peer.name.clone(), addr);
        }

        Ok(UdpRetransmitSink {
            socket,
            peers: resolved,
        })
    }
}

impl RetransmitSink for UdpRetransmitSink {
    fn peers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.keys().cloned().collect();
        names.sort();
        names
    }

    fn send(&self, sentence: &str, destination: &str) -> Result<()> {
        let addr = self
            .peers
            .get(destination)
            .ok_or_else(|| ServerError::Address(destination.to_string()))?;
        let mut payload = String::with_capacity(sentence.len() + 2);
        payload.push_str(sentence);
        payload.push_str("\r\n");
        self.socket.send_to(payload.as_bytes(), addr)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Raw file log
// ---------------------------------------------------------------------------

/// Appends `<epoch seconds> <sentence>` lines to a file.
pub struct FileRawLog {
    writer: Mutex<LineWriter<File>>,
}

impl FileRawLog {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileRawLog {
            writer: Mutex::new(LineWriter::new(file)),
        })
    }
}

impl RawLog for FileRawLog {
    fn log_raw(&self, sentence: &str) -> Result<()> {
        let mut w = self.writer.lock();
        writeln!(w, "{:.3} {}", now(), sentence)?;
        Ok(())
    }
}
