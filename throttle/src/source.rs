//! Synthetic byte source for exercising throttled paths.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Sleep, sleep};

/// Yields `size` zero bytes in caller-sized chunks, then EOF.
///
/// With a stall configured, the second read blocks for the stall duration
/// before returning data, mimicking an upstream that goes quiet mid-transfer.
pub struct StallingSource {
    remaining: usize,
    reads: usize,
    stall: Duration,
    stall_sleep: Option<Pin<Box<Sleep>>>,
}

impl StallingSource {
    pub fn new(size: usize) -> Self {
        Self::with_stall(size, Duration::ZERO)
    }

    pub fn with_stall(size: usize, stall: Duration) -> Self {
        Self {
            remaining: size,
            reads: 0,
            stall,
            stall_sleep: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl AsyncRead for StallingSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.reads == 1 && !this.stall.is_zero() {
            let stall = this.stall;
            let pending = this.stall_sleep.get_or_insert_with(|| Box::pin(sleep(stall)));
            ready!(pending.as_mut().poll(cx));
            this.stall_sleep = None;
            this.stall = Duration::ZERO;
        }

        let n = this.remaining.min(buf.remaining());
        buf.initialize_unfilled_to(n).fill(0);
        buf.advance(n);
        this.remaining -= n;
        this.reads += 1;
        Poll::Ready(Ok(()))
    }
}
