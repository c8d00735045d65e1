//! Host resource sampling.
//!
//! [`HostSource`] is the seam between the metrics feed and the operating
//! system. [`SysinfoHost`] is the real implementation; tests substitute a
//! fixed snapshot.

use serde::Serialize;
use sysinfo::{Disks, Networks, ProcessesToUpdate, System};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One reading of host resources.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HostSnapshot {
    /// Global CPU utilization percent.
    pub cpu_percent: f64,
    /// Logical CPUs.
    pub cpu_cores: usize,
    /// One-minute load average (0 where unsupported).
    pub load_average_1m: f64,
    /// Installed memory.
    pub memory_total_bytes: u64,
    /// Used memory.
    pub memory_used_bytes: u64,
    /// Size of the root filesystem.
    pub disk_total_bytes: u64,
    /// Free space on the root filesystem.
    pub disk_available_bytes: u64,
    /// Bytes sent over all interfaces since boot.
    pub network_bytes_sent: u64,
    /// Bytes received over all interfaces since boot.
    pub network_bytes_recv: u64,
    /// Running processes.
    pub process_count: usize,
    /// Host uptime.
    pub uptime_secs: u64,
}

impl HostSnapshot {
    /// Memory utilization percent.
    pub fn memory_percent(&self) -> f64 {
        percent(self.memory_used_bytes, self.memory_total_bytes)
    }

    /// Root filesystem utilization percent.
    pub fn disk_percent(&self) -> f64 {
        percent(self.disk_used_bytes(), self.disk_total_bytes)
    }

    /// Used space on the root filesystem.
    pub fn disk_used_bytes(&self) -> u64 {
        self.disk_total_bytes.saturating_sub(self.disk_available_bytes)
    }

    /// Convert a byte count to GiB.
    pub fn gib(bytes: u64) -> f64 {
        bytes as f64 / GIB
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Source of host resource readings.
pub trait HostSource: Send {
    /// Take a reading. CPU utilization is measured since the previous call.
    fn sample(&mut self) -> HostSnapshot;
}

/// [`HostSource`] backed by `sysinfo`.
pub struct SysinfoHost {
    system: System,
}

impl SysinfoHost {
    /// Create a source and prime the CPU counters.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSource for SysinfoHost {
    fn sample(&mut self) -> HostSnapshot {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        let _ = self.system.refresh_processes(ProcessesToUpdate::All, true);

        let (disk_total_bytes, disk_available_bytes) = root_disk();
        let (network_bytes_sent, network_bytes_recv) = network_totals();

        HostSnapshot {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            cpu_cores: self.system.cpus().len(),
            load_average_1m: System::load_average().one,
            memory_total_bytes: self.system.total_memory(),
            memory_used_bytes: self.system.used_memory(),
            disk_total_bytes,
            disk_available_bytes,
            network_bytes_sent,
            network_bytes_recv,
            process_count: self.system.processes().len(),
            uptime_secs: System::uptime(),
        }
    }
}

/// Total and available bytes of the filesystem mounted at `/`, or of the
/// largest disk when there is no such mount.
fn root_disk() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));
    root.map_or((0, 0), |d| (d.total_space(), d.available_space()))
}

fn network_totals() -> (u64, u64) {
    let networks = Networks::new_with_refreshed_list();
    networks
        .list()
        .values()
        .fold((0, 0), |(sent, recv), data| {
            (
                sent + data.total_transmitted(),
                recv + data.total_received(),
            )
        })
}
