use crate::domain::model::PipelineStage;
use std::time::{Duration, Instant};

#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

/// 單一請求階段的資源快照
#[derive(Debug, Clone)]
pub struct StageStats {
    pub stage: PipelineStage,
    pub elapsed: Duration,
    pub memory_mb: u64,
    pub peak_memory_mb: u64,
}

#[cfg(feature = "cli")]
pub struct SystemMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    started: Instant,
    peak_memory_mb: Mutex<u64>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("⚠️ Process stats unavailable: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            started: Instant::now(),
            peak_memory_mb: Mutex::new(0),
            enabled,
        }
    }

    pub fn snapshot(&self, stage: PipelineStage) -> Option<StageStats> {
        if !self.enabled {
            return None;
        }
        let pid = self.pid?;

        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let memory_mb = system.process(pid)?.memory() / 1024 / 1024;

        let mut peak = self.peak_memory_mb.lock().ok()?;
        if memory_mb > *peak {
            *peak = memory_mb;
        }

        Some(StageStats {
            stage,
            elapsed: self.started.elapsed(),
            memory_mb,
            peak_memory_mb: *peak,
        })
    }

    pub fn log_stats(&self, stage: PipelineStage) {
        if let Some(stats) = self.snapshot(stage) {
            tracing::info!(
                "📊 {:?} - Memory: {}MB, Peak: {}MB, Time: {:?}",
                stats.stage,
                stats.memory_mb,
                stats.peak_memory_mb,
                stats.elapsed
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// 非 CLI 建置只保留計時
#[cfg(not(feature = "cli"))]
pub struct SystemMonitor {
    started: Instant,
    enabled: bool,
}

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        Self {
            started: Instant::now(),
            enabled,
        }
    }

    pub fn snapshot(&self, stage: PipelineStage) -> Option<StageStats> {
        self.enabled.then(|| StageStats {
            stage,
            elapsed: self.started.elapsed(),
            memory_mb: 0,
            peak_memory_mb: 0,
        })
    }

    pub fn log_stats(&self, stage: PipelineStage) {
        if let Some(stats) = self.snapshot(stage) {
            tracing::info!("📊 {:?} - Time: {:?}", stats.stage, stats.elapsed);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
