use crate::limiter::Limiter;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Sleep, sleep};

/// Byte stream wrapper that throttles each direction with its own [`Limiter`].
///
/// Every read or write is handed to the inner stream exactly once; short
/// transfers come back to the caller unchanged. When the read limiter asks
/// for a delay, bytes already read are held back and delivered once the delay
/// has elapsed. A write always reports what reached the transport right away;
/// its delay gates the next write, flush or shutdown instead. Dropping a
/// pending call therefore never loses or double-counts bytes. Transport
/// errors skip the limiter.
pub struct RateLimitedStream<S> {
    inner: S,
    read_limiter: Limiter,
    write_limiter: Limiter,
    read_delay: Option<Pin<Box<Sleep>>>,
    read_stash: Vec<u8>,
    read_stash_pos: usize,
    write_gate: Option<Pin<Box<Sleep>>>,
}

impl<S> RateLimitedStream<S> {
    /// Throttle both directions of `inner` to `bandwidth` bytes per second.
    /// `0` leaves the stream unlimited.
    pub fn new(inner: S, bandwidth: u64) -> Self {
        Self::with_bandwidths(inner, bandwidth, bandwidth)
    }

    pub fn with_bandwidths(inner: S, read_bandwidth: u64, write_bandwidth: u64) -> Self {
        Self {
            inner,
            read_limiter: Limiter::new(read_bandwidth),
            write_limiter: Limiter::new(write_bandwidth),
            read_delay: None,
            read_stash: Vec::new(),
            read_stash_pos: 0,
            write_gate: None,
        }
    }

    pub fn set_bandwidth(&mut self, bandwidth: u64) {
        self.read_limiter.set_bandwidth(bandwidth);
        self.write_limiter.set_bandwidth(bandwidth);
    }

    pub fn read_bandwidth(&self) -> u64 {
        self.read_limiter.bandwidth()
    }

    pub fn write_bandwidth(&self) -> u64 {
        self.write_limiter.bandwidth()
    }

    /// A read is waiting out its delay or still has held-back bytes to hand out.
    pub fn read_in_progress(&self) -> bool {
        self.read_delay.is_some() || self.read_stash_pos < self.read_stash.len()
    }

    /// The last write is still waiting out its delay.
    pub fn write_in_progress(&self) -> bool {
        self.write_gate.is_some()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwrap the inner stream. Bytes held back by a pending read delay are lost.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Wait out the delay owed by the previous write, then open a new window.
    pub(crate) fn poll_write_gate(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(gate) = self.write_gate.as_mut() {
            ready!(gate.as_mut().poll(cx));
            self.write_gate = None;
            self.write_limiter.reset();
        }
        Poll::Ready(())
    }

    fn drain_stash(&mut self, buf: &mut ReadBuf<'_>) {
        let remaining = &self.read_stash[self.read_stash_pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.read_stash_pos += n;
        if self.read_stash_pos == self.read_stash.len() {
            self.read_stash.clear();
            self.read_stash_pos = 0;
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RateLimitedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(delay) = this.read_delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            this.read_delay = None;
            this.read_limiter.reset();
        }
        if this.read_stash_pos < this.read_stash.len() {
            this.drain_stash(buf);
            return Poll::Ready(Ok(()));
        }

        this.read_limiter.init();
        let requested = buf.remaining();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let transferred = buf.filled().len() - before;

        if let Some(delay) = this.read_limiter.record(transferred, requested) {
            let mut delay = Box::pin(sleep(delay));
            if delay.as_mut().poll(cx).is_ready() {
                this.read_limiter.reset();
                return Poll::Ready(Ok(()));
            }
            this.read_stash.extend_from_slice(&buf.filled()[before..]);
            buf.set_filled(before);
            this.read_delay = Some(delay);
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RateLimitedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_write_gate(cx));

        this.write_limiter.init();
        let written = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;

        if let Some(delay) = this.write_limiter.record(written, buf.len()) {
            this.write_gate = Some(Box::pin(sleep(delay)));
        }
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_gate(cx));
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_gate(cx));
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
