//! Derived metrics computed from one raw stats sample

use crate::models::{BlockIoEntry, ContainerStatsSample, CpuCounters, NetworkCounters};
use serde::{Deserialize, Serialize};

/// Gauge values for one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub container_id: String,
    pub container_name: String,
    pub cpu_percent: f64,
    pub memory_usage: f64,
    pub memory_max_usage: f64,
    pub memory_limit: f64,
    pub memory_cache: f64,
    pub memory_rss: f64,
    pub memory_usage_overall: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_io_read_bytes: u64,
    pub block_io_write_bytes: u64,
}

/// CPU usage between two readings, in percent of one CPU times online CPUs.
/// Returns 0 when the system counter did not advance.
pub fn cpu_percent(cur: &CpuCounters, prev: &CpuCounters) -> f64 {
    let cpu_delta = cur.total_usage as f64 - prev.total_usage as f64;
    let system_delta = cur.system_usage as f64 - prev.system_usage as f64;

    if system_delta <= 0.0 || cpu_delta < 0.0 {
        return 0.0;
    }
    cpu_delta / system_delta * f64::from(cur.online_cpus) * 100.0
}

/// Memory usage excluding page cache
pub fn memory_usage_overall(usage: u64, cache: u64) -> f64 {
    usage as f64 - cache as f64
}

fn network_totals(networks: &[NetworkCounters]) -> (u64, u64) {
    networks.iter().fold((0, 0), |(rx, tx), n| {
        (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
    })
}

fn block_io_totals(entries: &[BlockIoEntry]) -> (u64, u64) {
    entries.iter().fold((0, 0), |(read, write), e| {
        if e.op.eq_ignore_ascii_case("read") {
            (read.saturating_add(e.value), write)
        } else if e.op.eq_ignore_ascii_case("write") {
            (read, write.saturating_add(e.value))
        } else {
            (read, write)
        }
    })
}

impl From<&ContainerStatsSample> for DerivedMetrics {
    fn from(sample: &ContainerStatsSample) -> Self {
        let (network_rx_bytes, network_tx_bytes) = network_totals(&sample.networks);
        let (block_io_read_bytes, block_io_write_bytes) = block_io_totals(&sample.block_io);
        let memory = &sample.memory;

        Self {
            container_id: sample.container_id.clone(),
            container_name: sample.container_name.clone(),
            cpu_percent: cpu_percent(&sample.cpu, &sample.precpu),
            memory_usage: memory.usage as f64,
            memory_max_usage: memory.max_usage as f64,
            memory_limit: memory.limit as f64,
            memory_cache: memory.cache as f64,
            memory_rss: memory.rss as f64,
            memory_usage_overall: memory_usage_overall(memory.usage, memory.cache),
            network_rx_bytes,
            network_tx_bytes,
            block_io_read_bytes,
            block_io_write_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryCounters;

    fn cpu(total: u64, system: u64, online: u32) -> CpuCounters {
        CpuCounters {
            total_usage: total,
            system_usage: system,
            online_cpus: online,
        }
    }

    #[test]
    fn test_cpu_percent_formula() {
        let prev = cpu(1_000, 10_000, 4);
        let cur = cpu(1_500, 20_000, 4);
        // 500 / 10000 * 4 * 100
        assert!((cpu_percent(&cur, &prev) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_percent_zero_system_delta() {
        let prev = cpu(1_000, 10_000, 2);
        let cur = cpu(2_000, 10_000, 2);
        let value = cpu_percent(&cur, &prev);
        assert_eq!(value, 0.0);
        assert!(!value.is_nan());
    }

    #[test]
    fn test_cpu_percent_first_sample() {
        assert_eq!(cpu_percent(&cpu(0, 0, 0), &CpuCounters::default()), 0.0);
    }

    #[test]
    fn test_overall_memory_subtracts_cache() {
        assert_eq!(memory_usage_overall(1000, 300), 700.0);
        assert_eq!(memory_usage_overall(1000, 0), 1000.0);
    }

    #[test]
    fn test_totals_sum_interfaces_and_devices() {
        let sample = ContainerStatsSample {
            container_id: "abc".into(),
            container_name: "web".into(),
            memory: MemoryCounters {
                usage: 2048,
                max_usage: 4096,
                limit: 8192,
                cache: 48,
                rss: 1024,
            },
            networks: vec![
                NetworkCounters {
                    interface: "eth0".into(),
                    rx_bytes: 100,
                    tx_bytes: 10,
                },
                NetworkCounters {
                    interface: "eth1".into(),
                    rx_bytes: 50,
                    tx_bytes: 5,
                },
            ],
            block_io: vec![
                BlockIoEntry {
                    major: 8,
                    minor: 0,
                    op: "Read".into(),
                    value: 400,
                },
                BlockIoEntry {
                    major: 8,
                    minor: 16,
                    op: "read".into(),
                    value: 100,
                },
                BlockIoEntry {
                    major: 8,
                    minor: 0,
                    op: "Write".into(),
                    value: 30,
                },
                BlockIoEntry {
                    major: 8,
                    minor: 0,
                    op: "Sync".into(),
                    value: 999,
                },
            ],
            ..Default::default()
        };

        let derived = DerivedMetrics::from(&sample);

        assert_eq!(derived.network_rx_bytes, 150);
        assert_eq!(derived.network_tx_bytes, 15);
        assert_eq!(derived.block_io_read_bytes, 500);
        assert_eq!(derived.block_io_write_bytes, 30);
        assert_eq!(derived.memory_usage_overall, 2000.0);
        assert_eq!(derived.memory_limit, 8192.0);
        assert_eq!(derived.container_name, "web");
    }
}
