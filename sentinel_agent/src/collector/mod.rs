//! Host probes that produce raw samples for the pipeline.

pub mod netstat;
mod system;

pub use system::SysinfoCollector;

use crate::types::{ConnectionSample, ProcessSample, SystemStatSample};

/// One source of samples. Calls are blocking and may be slow.
pub trait Collector: Send {
    fn processes(&mut self) -> anyhow::Result<Vec<ProcessSample>>;
    fn connections(&mut self) -> anyhow::Result<Vec<ConnectionSample>>;
    fn system_stats(&mut self) -> anyhow::Result<SystemStatSample>;
}
