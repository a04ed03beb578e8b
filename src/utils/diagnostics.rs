//! System Diagnostics
//!
//! Startup information logged once so bug reports carry the host details.

use sysinfo::System;
use tracing::{info, warn};

/// System information for diagnostics
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Operating system name (e.g., "Linux", "Ubuntu")
    pub os_name: String,
    /// Operating system version string
    pub os_version: String,

    /// Kernel version string
    pub kernel_version: String,

    /// Number of logical CPU cores
    pub cpu_count: usize,

    /// Total system memory in megabytes
    pub total_memory_mb: u64,

    /// System hostname
    pub hostname: String,

    /// Effective user id of this process
    pub euid: u32,
}

impl SystemInfo {
    /// Gather system information
    pub fn gather() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
            cpu_count: sys.cpus().len(),
            total_memory_mb: sys.total_memory() / 1024 / 1024,
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
            euid: nix::unistd::geteuid().as_raw(),
        }
    }

    /// Whether backends can be launched as the logged-on user
    pub fn can_switch_users(&self) -> bool {
        self.euid == 0
    }

    /// Log system information
    pub fn log(&self) {
        info!("=== System Information ===");
        info!("  OS: {} {}", self.os_name, self.os_version);
        info!("  Kernel: {}", self.kernel_version);
        info!("  Hostname: {}", self.hostname);
        info!("  CPUs: {}", self.cpu_count);
        info!("  Memory: {} MB", self.total_memory_mb);
        info!("  Effective uid: {}", self.euid);
    }
}

/// Log startup diagnostics
pub fn log_startup_diagnostics() {
    let info = SystemInfo::gather();
    info.log();

    if !info.can_switch_users() {
        warn!("Not running as root: every backend will run as uid {}", info.euid);
    }
}
