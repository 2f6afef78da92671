use serde::Serialize;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Snapshot of the host resources a worker runs on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub mem_used_kb: u64,
    pub mem_used_percent: f64,
    pub disk_total: u64,
    pub disk_free: u64,
    pub disk_used: u64,
    /// Percentage of cpu in use across all cores.
    pub cpu_usage: f32,
    pub load: LoadAverage,
    pub task_count: usize,
}

/// Raw readings a [`Stats`] snapshot is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub disk_total: u64,
    pub disk_free: u64,
    pub cpu_usage: f32,
    pub load: LoadAverage,
}

impl Stats {
    /// Refreshes `system` and reads a new snapshot out of it.
    #[tracing::instrument(name = "Stats::collect", skip_all)]
    pub fn collect(system: &mut System, task_count: usize) -> Self {
        system.refresh_memory();
        system.refresh_cpu();
        system.refresh_disks_list();
        system.refresh_disks();

        let load = system.load_average();

        let readings = Readings {
            mem_total_kb: system.total_memory() / 1024,
            mem_available_kb: system.available_memory() / 1024,
            disk_total: system.disks().iter().map(|disk| disk.total_space()).sum(),
            disk_free: system
                .disks()
                .iter()
                .map(|disk| disk.available_space())
                .sum(),
            cpu_usage: system.global_cpu_info().cpu_usage(),
            load: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
        };

        Self::from_readings(readings, task_count)
    }

    pub fn from_readings(readings: Readings, task_count: usize) -> Self {
        let mem_used_kb = readings
            .mem_total_kb
            .saturating_sub(readings.mem_available_kb);

        let mem_used_percent = if readings.mem_total_kb == 0 {
            0.0
        } else {
            mem_used_kb as f64 / readings.mem_total_kb as f64 * 100.0
        };

        Self {
            mem_total_kb: readings.mem_total_kb,
            mem_available_kb: readings.mem_available_kb,
            mem_used_kb,
            mem_used_percent,
            disk_total: readings.disk_total,
            disk_free: readings.disk_free,
            disk_used: readings.disk_total.saturating_sub(readings.disk_free),
            cpu_usage: readings.cpu_usage,
            load: readings.load,
            task_count,
        }
    }
}
