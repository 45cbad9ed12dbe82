//! sysinfo-backed CPU and resident-memory sampling

use std::time::Instant;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, System};

use super::Sample;

/// Which processes a sample covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorScope {
    /// The current process only
    Process,
    /// The current process plus its direct children.
    ///
    /// A child's first observation reports 0% CPU because sysinfo has no
    /// earlier reading to diff against, so workers that exit within about
    /// two sampling intervals are under-counted.
    #[default]
    ProcessTree,
}

/// Polls one process (or process tree) for CPU and memory.
///
/// CPU usage is a rate since the previous refresh, so the first refresh
/// establishes the baseline and yields no usable reading.
pub struct ProcessSampler {
    system: System,
    pid: Pid,
    scope: MonitorScope,
    origin: Instant,
}

impl ProcessSampler {
    /// Build a sampler and take the baseline refresh
    pub fn start(scope: MonitorScope) -> Result<Self, String> {
        let pid = sysinfo::get_current_pid().map_err(|e| e.to_string())?;
        let mut sampler = Self {
            system: System::new(),
            pid,
            scope,
            origin: Instant::now(),
        };
        sampler.refresh();
        Ok(sampler)
    }

    fn refresh(&mut self) {
        match self.scope {
            MonitorScope::Process => {
                self.system.refresh_process_specifics(self.pid, refresh_kind());
            }
            MonitorScope::ProcessTree => {
                self.system.refresh_processes_specifics(refresh_kind());
            }
        }
    }

    /// Refresh and read one observation. `None` if the process vanished.
    pub fn sample(&mut self) -> Option<Sample> {
        self.refresh();
        let own = self.system.process(self.pid)?;

        let mut cpu_percent = own.cpu_usage() as f64;
        let mut memory_bytes = own.memory();

        if self.scope == MonitorScope::ProcessTree {
            for process in self.system.processes().values() {
                if process.parent() == Some(self.pid) {
                    cpu_percent += process.cpu_usage() as f64;
                    memory_bytes += process.memory();
                }
            }
        }

        Some(Sample {
            offset_seconds: self.origin.elapsed().as_secs_f64(),
            cpu_percent,
            memory_bytes,
        })
    }
}

fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::new().with_cpu().with_memory()
}
