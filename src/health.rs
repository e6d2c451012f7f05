//! System health snapshot: process, host, and provider reachability.
//!
//! The monitoring endpoint reports process uptime, CPU/memory/disk pressure
//! (via sysinfo), and the result and age of the latest reachability probe per
//! provider. Probes run on a background task in `main`; this module only
//! stores and reports their results.

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};

/// Result of the latest reachability probe for one provider.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub ok: bool,
    pub checked_at: Instant,
}

/// One provider's reachability as reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub reachable: bool,
    pub probe_age_secs: u64,
}

/// Full health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub providers: Vec<ProviderHealth>,
}

/// Health registry: process start time, host sampler, probe results.
pub struct Health {
    started_at: Instant,
    system: Mutex<System>,
    blob_root: PathBuf,
    probes: DashMap<String, ProbeResult>,
}

impl Health {
    pub fn new(blob_root: PathBuf) -> Self {
        Self {
            started_at: Instant::now(),
            system: Mutex::new(System::new()),
            blob_root,
            probes: DashMap::new(),
        }
    }

    /// Records a probe outcome for a provider.
    pub fn record_probe(&self, provider: &str, ok: bool) {
        self.probes.insert(
            provider.to_string(),
            ProbeResult {
                ok,
                checked_at: Instant::now(),
            },
        );
    }

    /// Latest probe result, if the provider has been probed.
    pub fn probe(&self, provider: &str) -> Option<ProbeResult> {
        self.probes.get(provider).map(|p| p.clone())
    }

    /// Disk usage of the filesystem holding the blob store, in percent.
    fn disk_percent(&self) -> f32 {
        let disks = Disks::new_with_refreshed_list();
        // Pick the mount with the longest prefix of the blob root; fall back
        // to the first disk.
        let root = self.blob_root.as_path();
        let best = disks
            .iter()
            .filter(|d| root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .or_else(|| disks.iter().next());

        match best {
            Some(disk) if disk.total_space() > 0 => {
                let used = disk.total_space() - disk.available_space();
                (used as f32 / disk.total_space() as f32) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Takes a full snapshot; cheap enough for an unauthenticated endpoint
    /// behind the default rate rule.
    pub fn snapshot(&self) -> HealthSnapshot {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();
            let cpu = system.global_cpu_info().cpu_usage();
            let memory = if system.total_memory() > 0 {
                (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        let mut providers: Vec<ProviderHealth> = self
            .probes
            .iter()
            .map(|entry| ProviderHealth {
                provider: entry.key().clone(),
                reachable: entry.ok,
                probe_age_secs: entry.checked_at.elapsed().as_secs(),
            })
            .collect();
        providers.sort_by(|a, b| a.provider.cmp(&b.provider));

        HealthSnapshot {
            status: "healthy",
            uptime_secs: self.started_at.elapsed().as_secs(),
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: self.disk_percent(),
            providers,
        }
    }

    /// How often the background prober should run.
    pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_uptime_and_probes() {
        let health = Health::new(PathBuf::from("."));
        health.record_probe("openai", true);
        health.record_probe("anthropic", false);

        let snap = health.snapshot();
        assert_eq!(snap.status, "healthy");
        assert_eq!(snap.providers.len(), 2);
        assert_eq!(snap.providers[0].provider, "anthropic");
        assert!(!snap.providers[0].reachable);
        assert!(snap.providers[1].reachable);
        assert!(snap.memory_percent >= 0.0 && snap.memory_percent <= 100.0);
    }
}
