//! Background samplers: one periodic task per sample kind, each collecting and ingesting
//! on the blocking pool so a slow probe never stalls the runtime.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::collector::Collector;
use crate::config::SamplingConfig;
use crate::pipeline::Pipeline;
use crate::types::Sample;

pub type SharedCollector = Arc<Mutex<dyn Collector>>;

fn spawn_loop<F>(
    name: &'static str,
    pipeline: Arc<Pipeline>,
    collector: SharedCollector,
    period: Duration,
    collect: F,
) -> JoinHandle<()>
where
    F: Fn(&mut dyn Collector) -> anyhow::Result<Vec<Sample>> + Send + Sync + Copy + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let pipeline = pipeline.clone();
            let collector = collector.clone();
            let tick = tokio::task::spawn_blocking(move || {
                let samples = {
                    let mut guard = collector
                        .lock()
                        .map_err(|_| anyhow!("collector lock poisoned"))?;
                    collect(&mut *guard)?
                };
                Ok::<_, anyhow::Error>(pipeline.ingest_batch(samples, Some(Utc::now())))
            })
            .await;
            match tick {
                Ok(Ok(report)) => debug!(
                    sampler = name,
                    stored = report.stored,
                    alerts = report.alerts,
                    "tick complete"
                ),
                Ok(Err(e)) => warn!(sampler = name, error = %e, "collection failed"),
                Err(e) => warn!(sampler = name, error = %e, "sampler tick aborted"),
            }
        }
    })
}

// 5s: process table
pub fn spawn_process_sampler(
    pipeline: Arc<Pipeline>,
    collector: SharedCollector,
    period: Duration,
) -> JoinHandle<()> {
    spawn_loop("process", pipeline, collector, period, |c| {
        Ok(c.processes()?.into_iter().map(Sample::Process).collect())
    })
}

// 5s: sockets
pub fn spawn_connection_sampler(
    pipeline: Arc<Pipeline>,
    collector: SharedCollector,
    period: Duration,
) -> JoinHandle<()> {
    spawn_loop("connection", pipeline, collector, period, |c| {
        Ok(c.connections()?.into_iter().map(Sample::Connection).collect())
    })
}

// 10s: cpu/mem/disk/load
pub fn spawn_stats_sampler(
    pipeline: Arc<Pipeline>,
    collector: SharedCollector,
    period: Duration,
) -> JoinHandle<()> {
    spawn_loop("stats", pipeline, collector, period, |c| {
        Ok(vec![Sample::SystemStat(c.system_stats()?)])
    })
}

/// Starts all three samplers, each on its own collector from `make`, so a slow scan of one
/// kind never holds up the others.
pub fn spawn_samplers<F>(
    pipeline: Arc<Pipeline>,
    cfg: &SamplingConfig,
    mut make: F,
) -> [JoinHandle<()>; 3]
where
    F: FnMut() -> SharedCollector,
{
    [
        spawn_process_sampler(pipeline.clone(), make(), cfg.process_interval()),
        spawn_connection_sampler(pipeline.clone(), make(), cfg.connection_interval()),
        spawn_stats_sampler(pipeline, make(), cfg.stats_interval()),
    ]
}
