//! Periodic resource report for the relay. Purely observational.

use std::{future::Future, sync::Arc, time::Duration};

use sysinfo::{Pid, System};
use tokio::{
    select,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};

use crate::registry::PeerRegistry;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    /// Resident memory of this process, when the platform exposes it.
    pub process_memory_bytes: Option<u64>,
    pub used_memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub load_one: f64,
}

pub struct ResourceSampler {
    system: System,
    pid: Option<Pid>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                warn!(error = err, "process id unavailable, skipping process memory");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    pub fn sample(&mut self) -> ResourceUsage {
        self.system.refresh_memory();
        let process_memory_bytes = self.pid.and_then(|pid| {
            self.system.refresh_process(pid);
            self.system.process(pid).map(|process| process.memory())
        });

        ResourceUsage {
            process_memory_bytes,
            used_memory_bytes: self.system.used_memory(),
            total_memory_bytes: self.system.total_memory(),
            load_one: System::load_average().one,
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs a resource sample plus membership size every `period` until `shutdown` resolves.
pub(crate) async fn report_until<F>(registry: Arc<PeerRegistry>, period: Duration, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    let mut sampler = ResourceSampler::new();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => log_usage(sampler.sample(), registry.len()),
        }
    }
}

fn log_usage(usage: ResourceUsage, members: usize) {
    info!(
        process_mib = usage.process_memory_bytes.map(|bytes| bytes / MIB),
        used_mib = usage.used_memory_bytes / MIB,
        total_mib = usage.total_memory_bytes / MIB,
        load_one = usage.load_one,
        members,
        "relay status"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_reports_plausible_memory() {
        let mut sampler = ResourceSampler::new();
        let usage = sampler.sample();
        assert!(usage.used_memory_bytes <= usage.total_memory_bytes);
        assert!(usage.load_one >= 0.0);
    }

    #[tokio::test]
    async fn reporter_stops_on_shutdown() {
        let registry = Arc::new(PeerRegistry::new());
        let reporter = tokio::spawn(report_until(
            registry,
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_millis(50)),
        ));

        tokio::time::timeout(Duration::from_secs(2), reporter)
            .await
            .expect("reporter should stop")
            .expect("reporter task");
    }
}
