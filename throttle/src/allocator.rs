use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Point-in-time view of an allocator, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorSnapshot {
    pub aggregate_bandwidth: u64,
    pub live_connections: usize,
}

struct AllocatorState {
    aggregate_bandwidth: u64,
    live_connections: usize,
}

/// Aggregate bandwidth shared by every connection accepted from one listener.
///
/// Each connection asks for its share on every I/O call. While the live
/// connections' nominal rates fit inside the aggregate they are honored as
/// requested; once oversubscribed every connection degrades to an equal split.
/// An aggregate of `0` is unbounded.
pub struct BandwidthAllocator {
    state: Mutex<AllocatorState>,
}

impl BandwidthAllocator {
    pub fn new(aggregate_bandwidth: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AllocatorState {
                aggregate_bandwidth,
                live_connections: 0,
            }),
        })
    }

    /// Count a new live connection. Dropping the returned guard releases it.
    pub fn register(self: &Arc<Self>) -> Registration {
        let live = {
            let mut state = self.state.lock();
            state.live_connections += 1;
            state.live_connections
        };
        debug!(live_connections = live, "Connection registered");
        Registration {
            allocator: Arc::clone(self),
        }
    }

    /// Release one live connection. Prefer dropping the [`Registration`]
    /// returned by [`BandwidthAllocator::register`], which calls this exactly once.
    pub fn unregister(&self) {
        let live = {
            let mut state = self.state.lock();
            if state.live_connections == 0 {
                None
            } else {
                state.live_connections -= 1;
                Some(state.live_connections)
            }
        };
        match live {
            Some(live) => debug!(live_connections = live, "Connection unregistered"),
            None => warn!("Unregister called with no live connections"),
        }
    }

    /// Bandwidth a connection asking for `nominal` bytes per second gets right now.
    pub fn effective_share(&self, nominal: u64) -> u64 {
        let (aggregate, live) = {
            let state = self.state.lock();
            (state.aggregate_bandwidth, state.live_connections)
        };
        share_of(aggregate, live, nominal)
    }

    pub fn set_aggregate_bandwidth(&self, aggregate_bandwidth: u64) {
        let previous = std::mem::replace(
            &mut self.state.lock().aggregate_bandwidth,
            aggregate_bandwidth,
        );
        if previous != aggregate_bandwidth {
            debug!(previous, aggregate_bandwidth, "Aggregate bandwidth changed");
        }
    }

    pub fn aggregate_bandwidth(&self) -> u64 {
        self.state.lock().aggregate_bandwidth
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().live_connections
    }

    pub fn snapshot(&self) -> AllocatorSnapshot {
        let state = self.state.lock();
        AllocatorSnapshot {
            aggregate_bandwidth: state.aggregate_bandwidth,
            live_connections: state.live_connections,
        }
    }
}

fn share_of(aggregate: u64, live: usize, nominal: u64) -> u64 {
    if aggregate == 0 {
        return nominal;
    }
    // A connection without its own cap may use the whole pool.
    let nominal = if nominal == 0 { aggregate } else { nominal };
    let live = (live as u64).max(1);

    if live.saturating_mul(nominal) <= aggregate {
        nominal
    } else {
        // Never round down to 0, which would mean unlimited.
        (aggregate / live).max(1)
    }
}

/// One live connection's claim on a [`BandwidthAllocator`].
///
/// Unregisters exactly once, when dropped.
pub struct Registration {
    allocator: Arc<BandwidthAllocator>,
}

impl Registration {
    pub fn allocator(&self) -> &Arc<BandwidthAllocator> {
        &self.allocator
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.allocator.unregister();
    }
}
