//! Threshold and heuristic rules that turn samples into alerts.
//!
//! Each rule is evaluated in isolation: an `Err` or a panic from one rule is
//! reported as a [`ClassificationFailure`] and the remaining rules still run.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::config::ClassifierConfig;
use crate::error::ClassificationFailure;
use crate::types::{
    Alert, AlertKind, ConnState, ConnectionSample, ProcessSample, Sample, SystemStatSample,
};

/// History a rule may consult besides the sample itself.
#[derive(Debug, Clone)]
pub struct Context {
    /// Latest stored system stat before the one being classified.
    /// `Err` carries the reason the lookup failed.
    pub previous_stat: Result<Option<SystemStatSample>, String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            previous_stat: Ok(None),
        }
    }
}

impl Context {
    pub fn with_previous(stat: SystemStatSample) -> Self {
        Self {
            previous_stat: Ok(Some(stat)),
        }
    }
}

pub trait Rule: Send + Sync {
    fn kind(&self) -> AlertKind;

    /// `Ok(None)` when the sample does not qualify (including samples of another kind).
    fn evaluate(&self, sample: &Sample, ctx: &Context) -> Result<Option<Alert>, String>;
}

#[derive(Debug, Default)]
pub struct Classification {
    pub alerts: Vec<Alert>,
    pub failures: Vec<ClassificationFailure>,
}

pub struct Classifier {
    rules: Vec<Box<dyn Rule>>,
}

impl Classifier {
    /// Builds the standard rule set. Fails only if a configured allow-list file cannot be read.
    pub fn new(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        let allowlist = cfg.load_allowlist()?;
        let mut rules: Vec<Box<dyn Rule>> = vec![
            Box::new(HighCpu {
                threshold: cfg.high_cpu_pct,
            }),
            Box::new(HighMemory {
                threshold_kb: cfg.high_memory_kb,
            }),
            Box::new(CpuSpike {
                delta: cfg.cpu_spike_delta,
            }),
            Box::new(MemorySpike {
                delta: cfg.memory_spike_delta,
            }),
            Box::new(SystemOverload {
                limit: cfg.effective_core_count() as f64 * cfg.overload_load_per_core,
            }),
            Box::new(SuspiciousPort {
                ports: cfg.suspicious_ports.clone(),
            }),
            Box::new(ExternalConnection),
        ];
        if let Some(known) = allowlist {
            rules.push(Box::new(UnknownProcess { known }));
        }
        Ok(Self { rules })
    }

    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Runs every rule once, in registration order.
    pub fn classify(&self, sample: &Sample, ctx: &Context) -> Classification {
        let mut out = Classification::default();
        for rule in &self.rules {
            let kind = rule.kind();
            let result = catch_unwind(AssertUnwindSafe(|| rule.evaluate(sample, ctx)))
                .unwrap_or_else(|panic| Err(panic_message(panic.as_ref())));
            match result {
                Ok(Some(alert)) => out.alerts.push(alert),
                Ok(None) => {}
                Err(reason) => {
                    warn!(rule = %kind, sample = ?sample.kind(), %reason, "classifier rule failed");
                    out.failures.push(ClassificationFailure { kind, reason });
                }
            }
        }
        out
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn previous(ctx: &Context) -> Result<Option<&SystemStatSample>, String> {
    ctx.previous_stat
        .as_ref()
        .map(Option::as_ref)
        .map_err(|e| format!("previous system stat unavailable: {e}"))
}

fn process(sample: &Sample) -> Option<&ProcessSample> {
    match sample {
        Sample::Process(p) => Some(p),
        _ => None,
    }
}

fn connection(sample: &Sample) -> Option<&ConnectionSample> {
    match sample {
        Sample::Connection(c) => Some(c),
        _ => None,
    }
}

fn stat(sample: &Sample) -> Option<&SystemStatSample> {
    match sample {
        Sample::SystemStat(s) => Some(s),
        _ => None,
    }
}

pub struct HighCpu {
    pub threshold: f64,
}

impl Rule for HighCpu {
    fn kind(&self) -> AlertKind {
        AlertKind::HighCpu
    }

    fn evaluate(&self, sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Ok(process(sample)
            .filter(|p| p.cpu_pct > self.threshold)
            .map(|p| {
                Alert::new(
                    self.kind(),
                    format!("Process {} using excessive CPU", p.name),
                    format!("PID: {}, CPU: {:.1}%", p.pid, p.cpu_pct),
                )
            }))
    }
}

pub struct HighMemory {
    pub threshold_kb: u64,
}

impl Rule for HighMemory {
    fn kind(&self) -> AlertKind {
        AlertKind::HighMemory
    }

    fn evaluate(&self, sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Ok(process(sample)
            .filter(|p| p.mem_kb > self.threshold_kb)
            .map(|p| {
                Alert::new(
                    self.kind(),
                    format!("Process {} using excessive memory", p.name),
                    format!("PID: {}, Memory: {} KB", p.pid, p.mem_kb),
                )
            }))
    }
}

pub struct CpuSpike {
    pub delta: f64,
}

impl Rule for CpuSpike {
    fn kind(&self) -> AlertKind {
        AlertKind::CpuSpike
    }

    fn evaluate(&self, sample: &Sample, ctx: &Context) -> Result<Option<Alert>, String> {
        let Some(current) = stat(sample) else {
            return Ok(None);
        };
        let Some(prev) = previous(ctx)? else {
            return Ok(None);
        };
        let rise = current.cpu_pct - prev.cpu_pct;
        Ok((rise > self.delta).then(|| {
            Alert::new(
                self.kind(),
                "Rapid CPU usage increase detected",
                format!(
                    "CPU: {:.1}% -> {:.1}% (+{rise:.1} pts)",
                    prev.cpu_pct, current.cpu_pct
                ),
            )
        }))
    }
}

pub struct MemorySpike {
    pub delta: f64,
}

impl Rule for MemorySpike {
    fn kind(&self) -> AlertKind {
        AlertKind::MemorySpike
    }

    fn evaluate(&self, sample: &Sample, ctx: &Context) -> Result<Option<Alert>, String> {
        let Some(current) = stat(sample) else {
            return Ok(None);
        };
        let Some(prev) = previous(ctx)? else {
            return Ok(None);
        };
        let rise = current.mem_pct - prev.mem_pct;
        Ok((rise > self.delta).then(|| {
            Alert::new(
                self.kind(),
                "Rapid memory usage increase detected",
                format!(
                    "Memory: {:.1}% -> {:.1}% (+{rise:.1} pts)",
                    prev.mem_pct, current.mem_pct
                ),
            )
        }))
    }
}

pub struct SystemOverload {
    /// Absolute load average above which the host counts as overloaded.
    pub limit: f64,
}

impl Rule for SystemOverload {
    fn kind(&self) -> AlertKind {
        AlertKind::SystemOverload
    }

    fn evaluate(&self, sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Ok(stat(sample).filter(|s| s.load_avg > self.limit).map(|s| {
            Alert::new(
                self.kind(),
                "System load above capacity",
                format!("Load average: {:.2}, limit: {:.2}", s.load_avg, self.limit),
            )
        }))
    }
}

pub struct SuspiciousPort {
    pub ports: BTreeSet<u16>,
}

impl Rule for SuspiciousPort {
    fn kind(&self) -> AlertKind {
        AlertKind::SuspiciousPort
    }

    // One alert per sample even when both ends match.
    fn evaluate(&self, sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        let Some(c) = connection(sample) else {
            return Ok(None);
        };
        let local = self.ports.contains(&c.local.port());
        let remote = self.ports.contains(&c.remote.port());
        let message = match (local, remote) {
            (_, true) => format!("Connection to suspicious port: {}", c.remote.port()),
            (true, false) => format!("Suspicious port detected: {}", c.local.port()),
            (false, false) => return Ok(None),
        };
        Ok(Some(Alert::new(
            self.kind(),
            message,
            format!(
                "Local: {}, Remote: {}, Protocol: {}, State: {}",
                c.local, c.remote, c.protocol, c.state
            ),
        )))
    }
}

pub struct ExternalConnection;

impl Rule for ExternalConnection {
    fn kind(&self) -> AlertKind {
        AlertKind::ExternalConnection
    }

    fn evaluate(&self, sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Ok(connection(sample)
            .filter(|c| c.state == ConnState::Established)
            .filter(|c| !c.remote.ip().to_canonical().is_loopback())
            .map(|c| {
                Alert::new(
                    self.kind(),
                    "External connection detected",
                    format!("Local: {} -> Remote: {}", c.local, c.remote),
                )
            }))
    }
}

pub struct UnknownProcess {
    pub known: BTreeSet<String>,
}

impl Rule for UnknownProcess {
    fn kind(&self) -> AlertKind {
        AlertKind::UnknownProcess
    }

    fn evaluate(&self, sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Ok(process(sample)
            .filter(|p| !self.known.contains(&p.name))
            .map(|p| {
                Alert::new(
                    self.kind(),
                    format!("Unknown process detected: {}", p.name),
                    format!("PID: {}", p.pid),
                )
            }))
    }
}
