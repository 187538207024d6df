//! Per-sentence ingestion path shared by every transport.
//!
//! A framed line fans out to the listener registry (prefixed sentences
//! only), the retransmission sink, the raw log, and the dispatcher. Side
//! effects do not depend on parse success and never fail the call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use nmea_core::dispatch::{Dispatched, Dispatcher};
use nmea_core::{has_sentence_prefix, NmeaError};

use crate::listeners::ListenerRegistry;
use crate::sinks::{RawLog, RetransmitSink};

#[derive(Debug, Default)]
struct Counters {
    framed: AtomicU64,
    parsed: AtomicU64,
    parse_errors: AtomicU64,
    external: AtomicU64,
    retransmitted: AtomicU64,
    retransmit_errors: AtomicU64,
    logged: AtomicU64,
    log_errors: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub framed: u64,
    pub parsed: u64,
    pub parse_errors: u64,
    pub external: u64,
    pub retransmitted: u64,
    pub retransmit_errors: u64,
    pub logged: u64,
    pub log_errors: u64,
}

pub struct SentencePipeline {
    dispatcher: Arc<Dispatcher>,
    listeners: Arc<ListenerRegistry>,
    retransmit: Option<Arc<dyn RetransmitSink>>,
    raw_log: Option<Arc<dyn RawLog>>,
    counters: Counters,
}

impl SentencePipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, listeners: Arc<ListenerRegistry>) -> Self {
        SentencePipeline {
            dispatcher,
            listeners,
            retransmit: None,
            raw_log: None,
            counters: Counters::default(),
        }
    }

    pub fn with_retransmit(mut self, sink: Arc<dyn RetransmitSink>) -> Self {
        self.retransmit = Some(sink);
        self
    }

    pub fn with_raw_log(mut self, log: Arc<dyn RawLog>) -> Self {
        self.raw_log = Some(log);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Handle one line received from a transport.
    pub fn ingest(&self, line: &str) -> Result<Dispatched, NmeaError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(NmeaError::Empty);
        }
        self.counters.framed.fetch_add(1, Ordering::Relaxed);

        if has_sentence_prefix(line) {
            self.listeners.notify(line);
        }

        let result = self.parse(line);

        if let Some(sink) = &self.retransmit {
            for peer in sink.peers() {
                match sink.send(line, &peer) {
                    Ok(()) => {
                        self.counters.retransmitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.counters
                            .retransmit_errors
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(peer = %peer, error = %e, "retransmit failed");
                    }
                }
            }
        }

        if let Some(log) = &self.raw_log {
            match log.log_raw(line) {
                Ok(()) => {
                    self.counters.logged.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.log_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "raw log write failed");
                }
            }
        }

        result
    }

    /// Handle a sentence delivered by the inbound message bus. Parsed only:
    /// no listeners, retransmission or raw log, so bus traffic is never
    /// echoed back out.
    pub fn ingest_external(&self, line: &str) -> Result<Dispatched, NmeaError> {
        self.counters.external.fetch_add(1, Ordering::Relaxed);
        self.parse(line.trim())
    }

    fn parse(&self, line: &str) -> Result<Dispatched, NmeaError> {
        let result = self.dispatcher.dispatch(line);
        match &result {
            Ok(_) => {
                self.counters.parsed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, sentence = %line, "sentence discarded");
            }
        }
        result
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            framed: c.framed.load(Ordering::Relaxed),
            parsed: c.parsed.load(Ordering::Relaxed),
            parse_errors: c.parse_errors.load(Ordering::Relaxed),
            external: c.external.load(Ordering::Relaxed),
            retransmitted: c.retransmitted.load(Ordering::Relaxed),
            retransmit_errors: c.retransmit_errors.load(Ordering::Relaxed),
            logged: c.logged.load(Ordering::Relaxed),
            log_errors: c.log_errors.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
