use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A phase boundary reported by the transport while an exchange runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GetConn,
    GotConn { reused: bool },
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    TlsHandshakeStart,
    TlsHandshakeDone,
    WroteRequest,
    GotFirstResponseByte,
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseEvent {
    pub phase: Phase,
    pub at: Instant,
}

/// Sending half of an exchange's event stream.
///
/// The transport only ever sends through this; the record itself is owned by
/// the tracer, which folds the events in order once the exchange is over.
#[derive(Debug, Clone)]
pub struct PhaseSink {
    tx: UnboundedSender<PhaseEvent>,
}

impl PhaseSink {
    pub fn channel() -> (PhaseSink, UnboundedReceiver<PhaseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PhaseSink { tx }, rx)
    }

    pub fn emit(&self, phase: Phase) {
        self.emit_at(phase, Instant::now());
    }

    pub fn emit_at(&self, phase: Phase, at: Instant) {
        // The receiver is gone once the tracer has finished; late events are noise.
        let _ = self.tx.send(PhaseEvent { phase, at });
    }
}

/// Per-phase durations of one traced exchange.
///
/// A zero duration means the phase did not happen (reused connection,
/// plaintext scheme, IP literal host) or was not observed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Timings {
    get_conn_start: Duration,
    connect_start: Duration,
    dns_start: Duration,
    tls_start: Duration,
    request_start: Duration,
    delay_start: Duration,
    response_start: Duration,

    /// DNS lookup duration
    pub dns: Duration,
    /// Time to establish the TCP connection to the destination server
    pub connection_dial: Duration,
    /// TLS handshake duration
    pub tls: Duration,
    /// Total connection setup (DNS lookup, dial and TLS); zero for a reused connection
    pub total_connection: Duration,
    /// From acquiring the connection to finishing the request write
    pub request_write: Duration,
    /// From finishing the write to the first response byte
    pub response_delay: Duration,
    /// From the first response byte to the end of the body
    pub response_read: Duration,
    /// From the start of the exchange to the end of the body
    pub total_request: Duration,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one phase boundary observed `elapsed` after the exchange started.
    pub fn observe(&mut self, phase: Phase, elapsed: Duration) {
        match phase {
            Phase::GetConn => self.get_conn_start = elapsed,
            Phase::GotConn { reused } => {
                if !reused {
                    self.total_connection = elapsed.saturating_sub(self.get_conn_start);
                }
                self.request_start = elapsed;
            }
            Phase::DnsStart => self.dns_start = elapsed,
            Phase::DnsDone => self.dns = elapsed.saturating_sub(self.dns_start),
            Phase::ConnectStart => self.connect_start = elapsed,
            Phase::ConnectDone => {
                self.connection_dial = elapsed.saturating_sub(self.connect_start)
            }
            Phase::TlsHandshakeStart => self.tls_start = elapsed,
            Phase::TlsHandshakeDone => self.tls = elapsed.saturating_sub(self.tls_start),
            Phase::WroteRequest => {
                self.request_write = elapsed.saturating_sub(self.request_start);
                self.delay_start = elapsed;
            }
            Phase::GotFirstResponseByte => {
                self.response_delay = elapsed.saturating_sub(self.delay_start);
                self.response_start = elapsed;
            }
        }
    }

    /// Folds every event already queued on `events`, measuring from `start`.
    pub fn observe_all(&mut self, start: Instant, events: &mut UnboundedReceiver<PhaseEvent>) {
        while let Ok(event) = events.try_recv() {
            self.observe(event.phase, event.at.saturating_duration_since(start));
        }
    }

    /// Closes the record once the body has been read.
    pub fn finish(&mut self, finished: Duration) {
        self.response_read = finished.saturating_sub(self.response_start);
        self.total_request = finished;
    }

    /// Sum of the four consecutive top-level phases.
    pub fn phase_sum(&self) -> Duration {
        self.total_connection + self.request_write + self.response_delay + self.response_read
    }
}
