use crate::config::{BandwidthLimits, BandwidthSource};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared, periodically refreshed snapshot of bandwidth settings.
///
/// Listeners read it once per accepted connection; nothing on the read/write
/// path touches it.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<BandwidthLimits>>,
}

impl SettingsHandle {
    pub fn new(limits: BandwidthLimits) -> Self {
        Self {
            current: Arc::new(RwLock::new(limits)),
        }
    }

    pub fn from_source<S: BandwidthSource + ?Sized>(source: &S) -> crate::Result<Self> {
        Ok(Self::new(source.limits()?))
    }

    pub fn current(&self) -> BandwidthLimits {
        *self.current.read()
    }

    /// Replace the snapshot, returning whether it changed.
    pub fn update(&self, limits: BandwidthLimits) -> bool {
        let mut current = self.current.write();
        if *current == limits {
            return false;
        }
        *current = limits;
        true
    }

    /// Re-read `source` once. A failing source leaves the snapshot untouched.
    pub fn refresh_from<S: BandwidthSource + ?Sized>(&self, source: &S) -> bool {
        match source.limits() {
            Ok(limits) => {
                let changed = self.update(limits);
                if changed {
                    info!(
                        aggregate = limits.aggregate,
                        per_connection = limits.per_connection,
                        "Bandwidth settings reloaded"
                    );
                }
                changed
            }
            Err(e) => {
                warn!("Keeping previous bandwidth settings: {}", e);
                false
            }
        }
    }

    /// Re-read `source` every `period` until the returned task is aborted.
    pub fn spawn_refresh<S>(&self, source: S, period: Duration) -> JoinHandle<()>
    where
        S: BandwidthSource + Send + Sync + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                handle.refresh_from(&source);
            }
        })
    }
}
