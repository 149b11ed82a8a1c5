//! Host memory and CPU probing.
//!
//! Linux reads `/proc/meminfo`; macOS shells out to `sysctl` and `vm_stat`.
//! Other platforms report no snapshot, which keeps the start guard closed.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemorySnapshot {
    pub total_mb: u64,
    pub free_mb: u64,
}

impl MemorySnapshot {
    pub fn free_percent(&self) -> f64 {
        crate::metrics::usage_percent(self.free_mb, self.total_mb)
    }
}

pub trait SystemMemory {
    fn snapshot(&self) -> Option<MemorySnapshot>;

    fn logical_cpus(&self) -> u32;

    /// Hint that the process should give back idle memory before a run.
    fn reclaim(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformMemory;

impl PlatformMemory {
    pub fn new() -> Self {
        Self
    }
}

impl SystemMemory for PlatformMemory {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        read_platform_memory()
    }

    fn logical_cpus(&self) -> u32 {
        std::thread::available_parallelism()
            .map(|count| u32::try_from(count.get()).unwrap_or(u32::MAX))
            .unwrap_or(1)
    }
}

#[cfg(target_os = "linux")]
fn read_platform_memory() -> Option<MemorySnapshot> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&contents)
}

#[cfg(target_os = "macos")]
fn read_platform_memory() -> Option<MemorySnapshot> {
    let total_bytes = std::process::Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .and_then(|text| text.trim().parse::<u64>().ok())?;
    let vm_stat = std::process::Command::new("vm_stat")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())?;
    let free_bytes = parse_vm_stat_free(&vm_stat);
    Some(MemorySnapshot {
        total_mb: total_bytes / 1024 / 1024,
        free_mb: free_bytes / 1024 / 1024,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_platform_memory() -> Option<MemorySnapshot> {
    None
}

/// Extracts `MemTotal`/`MemAvailable` (kB) as megabytes.
pub fn parse_meminfo(contents: &str) -> Option<MemorySnapshot> {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb(value);
        } else if let Some(value) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb(value);
        }
    }
    Some(MemorySnapshot {
        total_mb: total_kb? / 1024,
        free_mb: available_kb? / 1024,
    })
}

fn parse_kb(value: &str) -> Option<u64> {
    value.trim().trim_end_matches("kB").trim().parse().ok()
}

/// Free + inactive + purgeable pages, in bytes.
pub fn parse_vm_stat_free(output: &str) -> u64 {
    let page_size = output
        .lines()
        .next()
        .and_then(|line| {
            let start = line.find("page size of ")? + "page size of ".len();
            let end = line[start..].find(' ')? + start;
            line[start..end].parse::<u64>().ok()
        })
        .unwrap_or(16_384);

    let pages = |prefix: &str| {
        output
            .lines()
            .find_map(|line| line.strip_prefix(prefix))
            .and_then(|value| value.trim().trim_end_matches('.').parse::<u64>().ok())
            .unwrap_or(0)
    };

    (pages("Pages free:") + pages("Pages inactive:") + pages("Pages purgeable:")) * page_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_reports_available_as_free() {
        let sample = "MemTotal:       16314568 kB\nMemFree:         1234567 kB\nMemAvailable:    8157284 kB\n";
        assert_eq!(
            parse_meminfo(sample),
            Some(MemorySnapshot {
                total_mb: 15_932,
                free_mb: 7_966,
            })
        );
        assert_eq!(parse_meminfo("MemTotal: 100 kB\n"), None);
    }

    #[test]
    fn vm_stat_sums_reclaimable_pages() {
        let sample = "Mach Virtual Memory Statistics: (page size of 4096 bytes)\nPages free:                               10.\nPages active:                            99.\nPages inactive:                           5.\nPages purgeable:                          1.\n";
        assert_eq!(parse_vm_stat_free(sample), 16 * 4_096);
    }

    #[test]
    fn free_percent_rounds() {
        let snapshot = MemorySnapshot {
            total_mb: 3_000,
            free_mb: 1_000,
        };
        assert_eq!(snapshot.free_percent(), 33.3);
    }

    #[test]
    fn platform_reports_at_least_one_cpu() {
        assert!(PlatformMemory::new().logical_cpus() >= 1);
    }
}
