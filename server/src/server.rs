use crate::config::{ServeMode, ServerConfig};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use throttle::{FileSource, ManagedConnection, ManagedListener, SettingsHandle, StallingSource};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

pub struct ThrottleServer {
    config: Arc<ServerConfig>,
    settings: SettingsHandle,
    reload_source: Option<FileSource>,
}

impl ThrottleServer {
    /// `reload_from` is the config file to re-read for bandwidth changes.
    pub fn new(config: ServerConfig, reload_from: Option<&str>) -> Result<Self> {
        let limits = config
            .bandwidth
            .resolve()
            .context("Invalid bandwidth settings")?;
        let reload_source = match reload_from {
            Some(path) if config.reload_interval_secs > 0 => {
                Some(FileSource::new(path).with_table("bandwidth"))
            }
            _ => None,
        };

        Ok(Self {
            config: Arc::new(config),
            settings: SettingsHandle::new(limits),
            reload_source,
        })
    }

    pub async fn run(self) -> Result<()> {
        let tcp = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        let listener = ManagedListener::with_settings(tcp, self.settings.clone())?;
        info!(
            "Throttle server listening on {} ({:?} mode)",
            listener.local_addr()?,
            self.config.mode
        );

        let reload: Option<JoinHandle<()>> = self.reload_source.map(|source| {
            info!("Reloading bandwidth settings from {}", source.path().display());
            self.settings.spawn_refresh(
                source,
                Duration::from_secs(self.config.reload_interval_secs),
            )
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((conn, addr)) => {
                            let config = self.config.clone();
                            let span = info_span!("connection", peer = %addr);
                            tokio::spawn(
                                async move {
                                    if let Err(e) = handle_connection(conn, &config).await {
                                        error!("Error serving connection: {}", e);
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        if let Some(reload) = reload {
            reload.abort();
        }
        let snapshot = listener.allocator().snapshot();
        info!(
            "Stopped with {} live connections",
            snapshot.live_connections
        );
        Ok(())
    }
}

pub async fn handle_connection<S>(mut conn: ManagedConnection<S>, config: &ServerConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; config.chunk_size.max(1)];

    let served = match config.mode {
        ServeMode::Echo => echo(&mut conn, &mut chunk).await,
        ServeMode::Source => {
            let mut source = StallingSource::new(config.source_bytes as usize);
            pump(&mut source, &mut conn, &mut chunk).await
        }
    };
    let closed = conn.close().await;

    served?;
    closed?;
    Ok(())
}

async fn echo<S>(conn: &mut ManagedConnection<S>, chunk: &mut [u8]) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let n = conn.read(chunk).await?;
        if n == 0 {
            return Ok(());
        }
        conn.write_all(&chunk[..n]).await?;
    }
}

async fn pump<R, W>(source: &mut R, sink: &mut W, chunk: &mut [u8]) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = source.read(chunk).await?;
        if n == 0 {
            return sink.flush().await;
        }
        sink.write_all(&chunk[..n]).await?;
    }
}
