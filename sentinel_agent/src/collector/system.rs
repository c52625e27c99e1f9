use std::collections::HashSet;
use std::net::SocketAddr;

use anyhow::bail;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind,
    System,
};

use super::{netstat, Collector};
use crate::config::SamplingConfig;
use crate::types::{ConnectionSample, ProcessSample, Protocol, SystemStatSample};

type ConnKey = (Protocol, SocketAddr, SocketAddr);

/// Reference collector: sysinfo for processes and host stats, `/proc/net` for sockets.
pub struct SysinfoCollector {
    sys: System,
    disks: Disks,
    top_k: Option<usize>,
    only_new: bool,
    seen: HashSet<ConnKey>,
}

impl SysinfoCollector {
    pub fn new(cfg: &SamplingConfig) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        // Prime per-process CPU so the first tick has a baseline.
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, process_refresh());
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            top_k: cfg.process_top_k,
            only_new: cfg.connections_only_new,
            seen: HashSet::new(),
        }
    }
}

fn process_refresh() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_cpu().with_memory()
}

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

impl Collector for SysinfoCollector {
    fn processes(&mut self) -> anyhow::Result<Vec<ProcessSample>> {
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::All, true, process_refresh());
        let cores = self.sys.cpus().len().max(1) as f64;

        let mut out: Vec<ProcessSample> = self
            .sys
            .processes()
            .values()
            .map(|p| ProcessSample {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_pct: (f64::from(p.cpu_usage()) / cores).clamp(0.0, 100.0),
                mem_kb: p.memory() / 1024,
            })
            .filter(|p| !p.name.is_empty())
            .collect();

        if let Some(k) = self.top_k {
            out.sort_by(|a, b| b.cpu_pct.total_cmp(&a.cpu_pct));
            out.truncate(k);
        }
        Ok(out)
    }

    fn connections(&mut self) -> anyhow::Result<Vec<ConnectionSample>> {
        let current = netstat::read_connections();
        if !self.only_new {
            return Ok(current);
        }
        let keys: HashSet<ConnKey> = current
            .iter()
            .map(|c| (c.protocol, c.local, c.remote))
            .collect();
        let fresh = current
            .into_iter()
            .filter(|c| !self.seen.contains(&(c.protocol, c.local, c.remote)))
            .collect();
        self.seen = keys;
        Ok(fresh)
    }

    fn system_stats(&mut self) -> anyhow::Result<SystemStatSample> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh(true);

        let total_mem = self.sys.total_memory();
        if total_mem == 0 {
            bail!("memory totals unavailable");
        }
        let (disk_total, disk_avail) = self
            .disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(t, a), d| {
                (t.saturating_add(d.total_space()), a.saturating_add(d.available_space()))
            });

        Ok(SystemStatSample {
            cpu_pct: f64::from(self.sys.global_cpu_usage()).clamp(0.0, 100.0),
            mem_pct: pct(self.sys.used_memory(), total_mem),
            disk_pct: pct(disk_total.saturating_sub(disk_avail), disk_total),
            load_avg: System::load_average().one.max(0.0),
        })
    }
}
