use anyhow::{Result, bail, ensure};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use throttle::{ManagedConnection, ManagedListener, StallingSource, wrap_connection};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResults {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub details: Vec<ScenarioResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u128,
}

impl ScenarioResults {
    fn new() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            details: Vec::new(),
        }
    }

    fn add(&mut self, result: ScenarioResult) {
        self.total += 1;
        if result.passed {
            self.passed += 1;
            info!("✓ {} - PASSED ({} ms)", result.name, result.duration_ms);
        } else {
            self.failed += 1;
            error!(
                "✗ {} - FAILED: {}",
                result.name,
                result.error.as_deref().unwrap_or("Unknown error")
            );
        }
        self.details.push(result);
    }
}

/// Run every throttling scenario against loopback TCP. The stall scenario
/// alone takes about 30 seconds; `skip_slow` leaves it out.
pub async fn run_all(skip_slow: bool) -> Result<ScenarioResults> {
    info!("=== Starting Throttling Scenarios ===");
    let mut results = ScenarioResults::new();

    results.add(run("Construction Validation", construction_validation()).await);
    results.add(run("Rate Convergence", rate_convergence()).await);
    results.add(run("Unlimited Fast Path", unlimited_fast_path()).await);
    results.add(run("Headroom Pass-through", headroom_pass_through()).await);
    results.add(run("Fair-share Degradation", fair_share_degradation()).await);
    results.add(run("Dynamic Rebalancing", dynamic_rebalancing()).await);
    if skip_slow {
        info!("Skipping stall scenario");
    } else {
        results.add(run("Stalled Source", stalled_source()).await);
    }

    info!("=== Throttling Scenarios Complete ===");
    info!(
        "Total: {}, Passed: {}, Failed: {}",
        results.total, results.passed, results.failed
    );
    Ok(results)
}

async fn run<F>(name: &str, scenario: F) -> ScenarioResult
where
    F: Future<Output = Result<String>>,
{
    let start = Instant::now();
    let outcome = scenario.await;
    let duration_ms = start.elapsed().as_millis();

    match outcome {
        Ok(detail) => ScenarioResult {
            name: name.to_string(),
            passed: true,
            detail: Some(detail),
            error: None,
            duration_ms,
        },
        Err(e) => ScenarioResult {
            name: name.to_string(),
            passed: false,
            detail: None,
            error: Some(format!("{:#}", e)),
            duration_ms,
        },
    }
}

async fn bind(aggregate: i64, per_connection: i64) -> Result<ManagedListener<TcpListener>> {
    let tcp = TcpListener::bind("127.0.0.1:0").await?;
    Ok(ManagedListener::new(tcp, aggregate, per_connection)?)
}

/// Dial `count` loopback clients that drain everything they receive, and
/// accept each through `listener`.
async fn open(
    listener: &ManagedListener<TcpListener>,
    count: usize,
) -> Result<(Vec<ManagedConnection<TcpStream>>, Vec<JoinHandle<Result<u64>>>)> {
    let addr = listener.local_addr()?;
    let mut conns = Vec::with_capacity(count);
    let mut drains = Vec::with_capacity(count);

    for _ in 0..count {
        drains.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await?;
            Ok::<_, anyhow::Error>(tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?)
        }));
        let (conn, _) = listener.accept().await?;
        conns.push(conn);
    }
    Ok((conns, drains))
}

/// Write and flush `total` bytes in `chunk`-sized writes and return how long
/// it took.
async fn send<W: AsyncWrite + Unpin>(writer: &mut W, total: usize, chunk: usize) -> Result<Duration> {
    let buf = vec![0xA5u8; chunk];
    let start = Instant::now();
    let mut sent = 0;
    while sent < total {
        let n = chunk.min(total - sent);
        writer.write_all(&buf[..n]).await?;
        sent += n;
    }
    // waits out the delay owed by the last write
    writer.flush().await?;
    Ok(start.elapsed())
}

async fn pump<R, W>(source: &mut R, sink: &mut W, chunk: usize) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            sink.flush().await?;
            return Ok(total);
        }
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

fn ensure_near(actual: Duration, expected: Duration, tolerance: f64) -> Result<()> {
    let low = expected.mul_f64(1.0 - tolerance);
    let high = expected.mul_f64(1.0 + tolerance);
    if actual < low || actual > high {
        bail!("took {:?}, expected {:?} ± {:.0}%", actual, expected, tolerance * 100.0);
    }
    Ok(())
}

async fn close_all(
    conns: Vec<ManagedConnection<TcpStream>>,
    drains: Vec<JoinHandle<Result<u64>>>,
) -> Result<u64> {
    for mut conn in conns {
        conn.close().await?;
    }
    let mut received = 0;
    for drain in drains {
        received += drain.await??;
    }
    Ok(received)
}

async fn construction_validation() -> Result<String> {
    let tcp = TcpListener::bind("127.0.0.1:0").await?;
    match ManagedListener::new(tcp, 1024, 4096) {
        Ok(_) => bail!("listener accepted per-connection bandwidth above aggregate"),
        Err(e) if e.is_configuration() => Ok(e.to_string()),
        Err(e) => bail!("unexpected error kind: {}", e),
    }
}

async fn rate_convergence() -> Result<String> {
    const BANDWIDTH: i64 = 32 << 10;
    const PAYLOAD: usize = 96 << 10;

    let tcp = TcpListener::bind("127.0.0.1:0").await?;
    let addr = tcp.local_addr()?;
    let drain = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await?;
        Ok::<_, anyhow::Error>(tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?)
    });
    let (stream, _) = tcp.accept().await?;
    let mut conn = wrap_connection(stream, BANDWIDTH);

    let elapsed = send(&mut conn, PAYLOAD, 4096).await?;
    conn.close().await?;
    let received = drain.await??;

    ensure!(received == PAYLOAD as u64, "peer received {} bytes", received);
    ensure_near(elapsed, Duration::from_secs(3), 0.10)?;
    Ok(format!("{} bytes at {} B/s in {:?}", PAYLOAD, BANDWIDTH, elapsed))
}

async fn unlimited_fast_path() -> Result<String> {
    const PAYLOAD: usize = 8 << 20;

    let listener = bind(0, 0).await?;
    let (mut conns, drains) = open(&listener, 1).await?;
    let elapsed = send(&mut conns[0], PAYLOAD, 64 << 10).await?;
    let received = close_all(conns, drains).await?;

    ensure!(received == PAYLOAD as u64, "peer received {} bytes", received);
    ensure!(elapsed < Duration::from_secs(1), "took {:?} with no limit", elapsed);
    Ok(format!("{} bytes in {:?}", PAYLOAD, elapsed))
}

/// Every connection writes `payload` bytes concurrently; returns each
/// connection's duration and final effective share.
async fn concurrent_send(
    conns: Vec<ManagedConnection<TcpStream>>,
    payload: usize,
) -> Result<(Vec<ManagedConnection<TcpStream>>, Vec<(Duration, u64)>)> {
    let tasks: Vec<_> = conns
        .into_iter()
        .map(|mut conn| {
            tokio::spawn(async move {
                let elapsed = send(&mut conn, payload, 1024).await?;
                Ok::<_, anyhow::Error>((conn, elapsed))
            })
        })
        .collect();

    let mut conns = Vec::new();
    let mut outcomes = Vec::new();
    for task in tasks {
        let (conn, elapsed) = task.await??;
        outcomes.push((elapsed, conn.effective_bandwidth()));
        conns.push(conn);
    }
    Ok((conns, outcomes))
}

async fn headroom_pass_through() -> Result<String> {
    let listener = bind(8192, 2048).await?;
    let (conns, drains) = open(&listener, 3).await?;

    let (conns, outcomes) = concurrent_send(conns, 8 << 10).await?;
    close_all(conns, drains).await?;

    for (elapsed, share) in &outcomes {
        ensure!(*share == 2048, "effective share {} instead of nominal 2048", share);
        ensure_near(*elapsed, Duration::from_secs(4), 0.10)?;
    }
    Ok(format!("3 connections at nominal 2048 B/s: {:?}", outcomes))
}

async fn fair_share_degradation() -> Result<String> {
    let listener = bind(8192, 4096).await?;
    let (conns, drains) = open(&listener, 4).await?;

    let (conns, outcomes) = concurrent_send(conns, 8 << 10).await?;
    close_all(conns, drains).await?;

    for (elapsed, share) in &outcomes {
        ensure!(*share == 2048, "effective share {} instead of 8192/4", share);
        ensure_near(*elapsed, Duration::from_secs(4), 0.10)?;
    }
    Ok(format!("4 connections under 8192 B/s: {:?}", outcomes))
}

async fn dynamic_rebalancing() -> Result<String> {
    let listener = bind(4096, 4096).await?;
    let (mut conns, drains) = open(&listener, 2).await?;

    send(&mut conns[0], 1024, 1024).await?;
    let before = conns[0].effective_bandwidth();
    ensure!(before == 2048, "shared share {} instead of 2048", before);

    conns[1].close().await?;
    send(&mut conns[0], 1024, 1024).await?;
    let after = conns[0].effective_bandwidth();
    ensure!(after == 4096, "share after close {} instead of 4096", after);

    close_all(conns, drains).await?;
    ensure!(
        listener.allocator().live_connections() == 0,
        "{} connections still registered",
        listener.allocator().live_connections()
    );
    Ok(format!("share {} -> {} B/s after sibling closed", before, after))
}

async fn stalled_source() -> Result<String> {
    let listener = bind(4096, 1024).await?;
    let (mut conns, drains) = open(&listener, 1).await?;

    let mut source = StallingSource::with_stall(30 << 10, Duration::from_secs(1));
    let start = Instant::now();
    let sent = pump(&mut source, &mut conns[0], 1024).await?;
    let elapsed = start.elapsed();
    let share = conns[0].effective_bandwidth();
    close_all(conns, drains).await?;

    ensure!(share == 1024, "effective share {} instead of 1024", share);
    ensure!(
        elapsed >= Duration::from_secs(28) && elapsed <= Duration::from_secs(31),
        "took {:?}, expected 28s~31s",
        elapsed
    );
    Ok(format!("{} bytes with a 1s stall in {:?}", sent, elapsed))
}
