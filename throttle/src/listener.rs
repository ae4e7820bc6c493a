use crate::allocator::BandwidthAllocator;
use crate::config::{BandwidthLimits, BandwidthSource};
use crate::connection::ManagedConnection;
use crate::error::{Result, ThrottleError};
use crate::settings::SettingsHandle;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Transport that hands out new byte streams.
#[async_trait]
pub trait Acceptor: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Addr: Debug + Send;

    async fn accept(&self) -> io::Result<(Self::Stream, Self::Addr)>;

    fn local_addr(&self) -> io::Result<Self::Addr>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

#[cfg(unix)]
#[async_trait]
impl Acceptor for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;
    type Addr = tokio::net::unix::SocketAddr;

    async fn accept(&self) -> io::Result<(Self::Stream, Self::Addr)> {
        tokio::net::UnixListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::UnixListener::local_addr(self)
    }
}

/// Listener whose accepted connections share one aggregate bandwidth.
pub struct ManagedListener<A> {
    acceptor: A,
    allocator: Arc<BandwidthAllocator>,
    per_connection: AtomicU64,
    settings: Option<SettingsHandle>,
}

impl<A: Acceptor> ManagedListener<A> {
    /// Wrap `acceptor` with an `aggregate` cap shared by all its connections
    /// and a `per_connection` cap for each. `0` aggregate is unbounded and
    /// negative values fall back to the default rate. Fails when
    /// `per_connection` exceeds a bounded aggregate.
    pub fn new(acceptor: A, aggregate: i64, per_connection: i64) -> Result<Self> {
        Self::from_limits(acceptor, BandwidthLimits::new(aggregate, per_connection)?)
    }

    pub fn from_source<S: BandwidthSource + ?Sized>(acceptor: A, source: &S) -> Result<Self> {
        Self::from_limits(acceptor, source.limits()?)
    }

    pub fn from_limits(acceptor: A, limits: BandwidthLimits) -> Result<Self> {
        Self::build(acceptor, limits, None)
    }

    /// Follow a live settings snapshot: every accept applies the current
    /// aggregate to the pool and gives the new connection the current
    /// per-connection rate.
    pub fn with_settings(acceptor: A, settings: SettingsHandle) -> Result<Self> {
        let limits = settings.current();
        Self::build(acceptor, limits, Some(settings))
    }

    fn build(acceptor: A, limits: BandwidthLimits, settings: Option<SettingsHandle>) -> Result<Self> {
        check_limits(&limits)?;
        info!(
            aggregate = limits.aggregate,
            per_connection = limits.per_connection,
            "Throttled listener ready"
        );
        Ok(Self {
            acceptor,
            allocator: BandwidthAllocator::new(limits.aggregate),
            per_connection: AtomicU64::new(limits.per_connection),
            settings,
        })
    }

    pub async fn accept(&self) -> io::Result<(ManagedConnection<A::Stream>, A::Addr)> {
        let (stream, addr) = self.acceptor.accept().await?;

        let nominal = self.current_nominal();
        let registration = self.allocator.register();
        let conn = ManagedConnection::pooled(stream, nominal, registration);
        info!(
            peer = ?addr,
            nominal,
            effective = conn.effective_bandwidth(),
            "Accepted throttled connection"
        );
        Ok((conn, addr))
    }

    fn current_nominal(&self) -> u64 {
        if let Some(settings) = &self.settings {
            let limits = settings.current();
            if check_limits(&limits).is_ok() {
                self.allocator.set_aggregate_bandwidth(limits.aggregate);
                self.per_connection
                    .store(limits.per_connection, Ordering::Relaxed);
            }
        }
        self.per_connection.load(Ordering::Relaxed)
    }

    pub fn allocator(&self) -> &Arc<BandwidthAllocator> {
        &self.allocator
    }

    pub fn per_connection_bandwidth(&self) -> u64 {
        self.per_connection.load(Ordering::Relaxed)
    }

    pub fn local_addr(&self) -> io::Result<A::Addr> {
        self.acceptor.local_addr()
    }

    pub fn get_ref(&self) -> &A {
        &self.acceptor
    }
}

fn check_limits(limits: &BandwidthLimits) -> Result<()> {
    if limits.aggregate > 0 && limits.per_connection > limits.aggregate {
        return Err(ThrottleError::ConnectionBandwidthExceedsAggregate {
            per_connection: limits.per_connection,
            aggregate: limits.aggregate,
        });
    }
    Ok(())
}
