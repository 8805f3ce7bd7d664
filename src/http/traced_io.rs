// The connection's byte stream, wrapped so that the request-written and
// first-response-byte boundaries can be observed. hyper gives no hooks for
// either, so they are inferred from the reads and writes it performs.

use crate::trace::timings::{Phase, PhaseSink};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Transport::Tls(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Transport::Plain(s) => s.is_write_vectored(),
            Transport::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[derive(Default)]
struct TapState {
    sink: Option<PhaseSink>,
    last_write: Option<Instant>,
    answered: bool,
}

/// Binds a connection to the exchange currently using it.
///
/// A pooled connection outlives the exchange that opened it, so every
/// exchange re-attaches its own sink before sending.
#[derive(Clone, Default)]
pub struct Tap {
    state: Arc<Mutex<TapState>>,
}

impl Tap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sink: PhaseSink) {
        if let Ok(mut state) = self.state.lock() {
            *state = TapState {
                sink: Some(sink),
                ..TapState::default()
            };
        }
    }

    fn wrote(&self, flush: bool) {
        if let Ok(mut state) = self.state.lock() {
            if state.sink.is_none() || state.answered {
                return;
            }
            // A flush only moves the mark if request bytes were written before it.
            if !flush || state.last_write.is_some() {
                state.last_write = Some(Instant::now());
            }
        }
    }

    fn read(&self, n: usize) {
        if n == 0 {
            return;
        }
        if let Ok(mut guard) = self.state.lock() {
            let state = &mut *guard;
            if state.answered {
                return;
            }
            let now = Instant::now();
            if let Some(sink) = state.sink.as_ref() {
                sink.emit_at(Phase::WroteRequest, state.last_write.unwrap_or(now));
                sink.emit_at(Phase::GotFirstResponseByte, now);
                state.answered = true;
            }
        }
    }
}

pub struct TracedIo<T> {
    inner: T,
    tap: Tap,
}

impl<T> TracedIo<T> {
    pub fn new(inner: T, tap: Tap) -> Self {
        Self { inner, tap }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TracedIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            this.tap.read(buf.filled().len() - before);
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TracedIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            if n > 0 {
                this.tap.wrote(false);
            }
        }
        res
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = res {
            if n > 0 {
                this.tap.wrote(false);
            }
        }
        res
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = res {
            this.tap.wrote(true);
        }
        res
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn first_read_after_write_reports_both_boundaries() {
        let (client, mut server) = tokio::io::duplex(64);
        let (sink, mut events) = PhaseSink::channel();
        let tap = Tap::new();
        tap.attach(sink);
        let mut io = TracedIo::new(client, tap);

        io.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        io.flush().await.unwrap();
        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        io.read(&mut buf).await.unwrap();
        io.read(&mut buf).await.unwrap();

        let wrote = events.try_recv().unwrap();
        let first = events.try_recv().unwrap();
        assert_eq!(wrote.phase, Phase::WroteRequest);
        assert_eq!(first.phase, Phase::GotFirstResponseByte);
        assert!(wrote.at <= first.at);
        // Later reads of the same response are not boundaries.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn reattaching_rearms_the_tap() {
        let (client, mut server) = tokio::io::duplex(64);
        let tap = Tap::new();
        let mut io = TracedIo::new(client, tap.clone());

        let (first_sink, mut first) = PhaseSink::channel();
        tap.attach(first_sink);
        io.write_all(b"a").await.unwrap();
        server.write_all(b"b").await.unwrap();
        let mut buf = [0u8; 1];
        io.read(&mut buf).await.unwrap();
        assert_eq!(first.try_recv().unwrap().phase, Phase::WroteRequest);

        let (second_sink, mut second) = PhaseSink::channel();
        tap.attach(second_sink);
        io.write_all(b"c").await.unwrap();
        server.write_all(b"d").await.unwrap();
        io.read(&mut buf).await.unwrap();
        assert_eq!(second.try_recv().unwrap().phase, Phase::WroteRequest);
        assert_eq!(second.try_recv().unwrap().phase, Phase::GotFirstResponseByte);
    }

    #[tokio::test]
    async fn unattached_tap_stays_silent() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut io = TracedIo::new(client, Tap::new());
        server.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(io.read(&mut buf).await.unwrap(), 1);
    }
}
