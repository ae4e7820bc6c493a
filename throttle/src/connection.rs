use crate::allocator::{BandwidthAllocator, Registration};
use crate::config::normalize_bandwidth;
use crate::stream::RateLimitedStream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, info};

/// Throttle a single connection to `bandwidth` bytes per second, with no
/// listener-wide pool. `0` leaves it unlimited; negative values fall back to
/// [`DEFAULT_BANDWIDTH`](crate::config::DEFAULT_BANDWIDTH).
pub fn wrap_connection<S>(stream: S, bandwidth: i64) -> ManagedConnection<S> {
    ManagedConnection::standalone(stream, normalize_bandwidth(bandwidth))
}

/// A transport connection throttled to its share of bandwidth.
///
/// Connections accepted from a [`ManagedListener`](crate::ManagedListener)
/// ask the listener's allocator for their share before every read and write,
/// so a sibling closing speeds them up on their very next operation.
/// Standalone connections keep a fixed rate.
pub struct ManagedConnection<S> {
    stream: RateLimitedStream<S>,
    nominal_bandwidth: u64,
    effective_bandwidth: u64,
    registration: Option<Registration>,
    closed: bool,
    bytes_read: u64,
    bytes_written: u64,
}

impl<S> ManagedConnection<S> {
    pub fn standalone(stream: S, bandwidth: u64) -> Self {
        Self {
            stream: RateLimitedStream::new(stream, bandwidth),
            nominal_bandwidth: bandwidth,
            effective_bandwidth: bandwidth,
            registration: None,
            closed: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub(crate) fn pooled(stream: S, nominal_bandwidth: u64, registration: Registration) -> Self {
        let effective_bandwidth = registration.allocator().effective_share(nominal_bandwidth);
        Self {
            stream: RateLimitedStream::new(stream, effective_bandwidth),
            nominal_bandwidth,
            effective_bandwidth,
            registration: Some(registration),
            closed: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn nominal_bandwidth(&self) -> u64 {
        self.nominal_bandwidth
    }

    /// Share enforced on the most recent read or write.
    pub fn effective_bandwidth(&self) -> u64 {
        self.effective_bandwidth
    }

    /// Pool this connection draws from; `None` for standalone connections
    /// and once the connection is closed.
    pub fn allocator(&self) -> Option<&Arc<BandwidthAllocator>> {
        self.registration.as_ref().map(Registration::allocator)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut S {
        self.stream.get_mut()
    }

    /// Unwrap the transport, releasing the connection's share of the pool.
    /// Bytes held back by a pending read delay are lost.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn refresh_share(&mut self) {
        let Some(registration) = &self.registration else {
            return;
        };

        let share = registration.allocator().effective_share(self.nominal_bandwidth);
        if share != self.effective_bandwidth {
            debug!(
                nominal = self.nominal_bandwidth,
                previous = self.effective_bandwidth,
                share,
                "Effective bandwidth changed"
            );
            self.effective_bandwidth = share;
            self.stream.set_bandwidth(share);
        }
    }

    fn release(&mut self) {
        self.closed = true;
        if let Some(registration) = self.registration.take() {
            drop(registration);
            info!(
                bytes_read = self.bytes_read,
                bytes_written = self.bytes_written,
                "Throttled connection closed"
            );
        }
    }
}

impl<S: AsyncWrite + Unpin> ManagedConnection<S> {
    /// Shut the transport down and give the connection's share back to the
    /// pool. Later calls do nothing.
    pub async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ManagedConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.stream.read_in_progress() {
            this.refresh_share();
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stream).poll_read(cx, buf))?;
        this.bytes_read += (buf.filled().len() - before) as u64;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ManagedConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.stream.poll_write_gate(cx));
        this.refresh_share();

        let written = ready!(Pin::new(&mut this.stream).poll_write(cx, buf))?;
        this.bytes_written += written as u64;
        Poll::Ready(Ok(written))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }

        let result = ready!(Pin::new(&mut this.stream).poll_shutdown(cx));
        // The share goes back to the pool even when the transport fails to close.
        this.release();
        Poll::Ready(result)
    }
}
