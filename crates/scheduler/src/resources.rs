// crates/scheduler/src/resources.rs
//! Process-memory introspection and the per-execution resource scope.

use std::time::Instant;
use sysinfo::{ProcessesToUpdate, System};
use tracing::warn;

/// Memory delta above which an execution is flagged.
const MEMORY_WARN_MB: u64 = 50;

/// Resident memory of this process in MB; zero when unavailable.
pub fn process_memory_mb() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|p| p.memory() / 1024 / 1024)
        .unwrap_or(0)
}

/// Captures memory and wall-clock at construction; [`finish`] logs a
/// warning when the execution grew the process by more than 50 MB.
///
/// [`finish`]: ResourceScope::finish
pub struct ResourceScope {
    start_memory_mb: u64,
    started: Instant,
}

impl ResourceScope {
    pub fn enter() -> Self {
        Self {
            start_memory_mb: process_memory_mb(),
            started: Instant::now(),
        }
    }

    /// Returns `(memory_delta_mb, duration_secs)`.
    pub fn finish(self) -> (i64, f64) {
        let end = process_memory_mb();
        let delta = end as i64 - self.start_memory_mb as i64;
        let duration = self.started.elapsed().as_secs_f64();

        if delta > MEMORY_WARN_MB as i64 {
            warn!(
                memory_delta_mb = delta,
                duration_secs = duration,
                "task execution used significant additional memory"
            );
        }
        (delta, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_memory_is_nonzero() {
        assert!(process_memory_mb() > 0);
    }

    #[test]
    fn test_scope_reports_duration() {
        let scope = ResourceScope::enter();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (_, duration) = scope.finish();
        assert!(duration >= 0.02);
    }
}
