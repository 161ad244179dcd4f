//! Telemetry and metrics collection

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// System metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,

    /// Memory usage in bytes
    pub memory_used: u64,

    /// Total memory in bytes
    pub memory_total: u64,

    /// Memory usage percentage
    pub memory_percent: f32,

    /// Disk usage percentage
    pub disk_percent: f32,

    /// System uptime in seconds
    pub uptime_secs: u64,

    /// Number of CPU cores
    pub cpu_count: usize,

    /// Hostname
    pub hostname: String,
}

/// Collect system metrics
pub fn collect_metrics() -> SystemMetrics {
    let mut sys = System::new_all();
    sys.refresh_all();

    let disks = Disks::new_with_refreshed_list();
    let (disk_used, disk_total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });

    let memory_used = sys.used_memory();
    let memory_total = sys.total_memory();

    SystemMetrics {
        cpu_usage: sys.global_cpu_usage(),
        memory_used,
        memory_total,
        memory_percent: if memory_total > 0 {
            (memory_used as f32 / memory_total as f32) * 100.0
        } else {
            0.0
        },
        disk_percent: if disk_total > 0 {
            (disk_used as f32 / disk_total as f32) * 100.0
        } else {
            0.0
        },
        uptime_secs: System::uptime(),
        cpu_count: sys.cpus().len(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Run counters for one environment/region pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetCounters {
    pub started: u64,
    pub succeeded: u64,
    pub partial: u64,
    pub failed: u64,
    pub rollbacks: u64,
}

/// Orchestrator counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub captured_at: Option<DateTime<Utc>>,
    /// Keyed by `environment/region`
    pub targets: BTreeMap<String, TargetCounters>,
    pub lock_contentions: u64,
    pub compliance_blocks: u64,
    pub canary_aborts: u64,
}

/// Outcome of one run, for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Default)]
pub struct OrchestratorMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner);
    }

    fn target<'a>(
        snapshot: &'a mut MetricsSnapshot,
        environment: &str,
        region: &str,
    ) -> &'a mut TargetCounters {
        snapshot
            .targets
            .entry(format!("{}/{}", environment, region))
            .or_default()
    }

    pub fn record_started(&self, environment: &str, region: &str) {
        self.update(|m| Self::target(m, environment, region).started += 1);
    }

    pub fn record_outcome(&self, environment: &str, region: &str, outcome: RunOutcome) {
        self.update(|m| {
            let target = Self::target(m, environment, region);
            match outcome {
                RunOutcome::Success => target.succeeded += 1,
                RunOutcome::Partial => target.partial += 1,
                RunOutcome::Failed => target.failed += 1,
            }
        });
    }

    pub fn record_rollback(&self, environment: &str, region: &str) {
        self.update(|m| Self::target(m, environment, region).rollbacks += 1);
    }

    pub fn record_lock_contention(&self) {
        self.update(|m| m.lock_contentions += 1);
    }

    pub fn record_compliance_block(&self) {
        self.update(|m| m.compliance_blocks += 1);
    }

    pub fn record_canary_abort(&self) {
        self.update(|m| m.canary_aborts += 1);
    }

    /// Failures recorded for one environment/region
    pub fn failures(&self, environment: &str, region: &str) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .targets
            .get(&format!("{}/{}", environment, region))
            .map(|t| t.failed)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = inner.clone();
        snapshot.captured_at = Some(Utc::now());
        snapshot
    }
}
