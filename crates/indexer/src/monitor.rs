// crates/indexer/src/monitor.rs
//! Background memory monitoring for the indexing run.

use std::sync::Mutex;
use std::time::Duration;
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Samples system memory and signals throttling above a ceiling.
pub struct ResourceMonitor {
    max_memory_percent: f32,
    system: Mutex<System>,
    cancel: CancellationToken,
}

impl ResourceMonitor {
    pub fn new(max_memory_percent: f32) -> Self {
        Self {
            max_memory_percent,
            system: Mutex::new(System::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Current system memory usage as a percentage of total.
    pub fn memory_percent(&self) -> f32 {
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (system.used_memory() as f64 / total as f64 * 100.0) as f32
    }

    /// Whether the dispatcher should pause between batches.
    pub fn should_throttle(&self) -> bool {
        self.memory_percent() > self.max_memory_percent
    }

    /// Spawn the sampling loop. It warns when usage crosses the ceiling
    /// and exits when [`stop`](Self::stop) is called.
    pub fn start(self: std::sync::Arc<Self>) {
        let cancel = self.cancel.clone();
        let monitor = self;
        tokio::spawn(async move {
            debug!("resource monitoring started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(SAMPLE_INTERVAL) => {
                        let percent = monitor.memory_percent();
                        if percent > monitor.max_memory_percent {
                            warn!(
                                memory_percent = percent,
                                ceiling = monitor.max_memory_percent,
                                "high memory usage detected, throttling indexing"
                            );
                        }
                    }
                }
            }
            debug!("resource monitoring stopped");
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
