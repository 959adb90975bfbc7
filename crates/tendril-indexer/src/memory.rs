//! Process memory sampling for scan and build statistics

use sysinfo::{ProcessesToUpdate, System};

/// Resident memory of the current process in bytes, if the platform
/// reports it.
pub fn resident_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}

/// Tracks the highest resident size seen across explicit samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryProbe {
    baseline: u64,
    peak: u64,
}

impl MemoryProbe {
    pub fn start() -> Self {
        let baseline = resident_bytes().unwrap_or(0);
        MemoryProbe {
            baseline,
            peak: baseline,
        }
    }

    pub fn sample(&mut self) {
        if let Some(current) = resident_bytes() {
            self.peak = self.peak.max(current);
        }
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Peak minus the starting resident size.
    pub fn delta(&self) -> i64 {
        self.peak as i64 - self.baseline as i64
    }
}
