use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sentinel_agent::broadcast::Broadcaster;
use sentinel_agent::classifier::{Classifier, Context, Rule};
use sentinel_agent::config::ClassifierConfig;
use sentinel_agent::pipeline::Pipeline;
use sentinel_agent::store::{self, MemoryStore, Store};
use sentinel_agent::types::{
    Alert, AlertKind, ConnState, ConnectionSample, ProcessSample, Protocol, Record, RecordBody,
    RecordKind, Sample, SystemStatSample,
};
use sentinel_agent::Error;

fn classifier() -> Classifier {
    Classifier::new(&ClassifierConfig {
        core_count: Some(4),
        ..ClassifierConfig::default()
    })
    .unwrap()
}

fn pipeline_with(store: Arc<dyn Store>, classifier: Classifier) -> (Pipeline, Arc<Broadcaster>) {
    let b = Arc::new(Broadcaster::new(64));
    (Pipeline::new(store, classifier, b.clone()), b)
}

fn stat(cpu: f64) -> Sample {
    Sample::SystemStat(SystemStatSample {
        cpu_pct: cpu,
        mem_pct: 30.0,
        disk_pct: 40.0,
        load_avg: 0.5,
    })
}

fn process(pid: u32, cpu: f64) -> Sample {
    Sample::Process(ProcessSample {
        pid,
        name: "stress".into(),
        cpu_pct: cpu,
        mem_kb: 2048,
    })
}

#[test]
fn stat_sequence_raises_spike_on_second_sample() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (p, _) = pipeline_with(store.clone(), classifier());

    let first = p.ingest(stat(40.0), None).unwrap();
    assert!(first.alerts.is_empty());
    let second = p.ingest(stat(85.0), None).unwrap();
    assert_eq!(second.alerts.len(), 1);

    let alerts = store::recent::<Alert>(store.as_ref(), 10).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].data.kind, AlertKind::CpuSpike);
    assert_eq!(store::recent::<SystemStatSample>(store.as_ref(), 10).unwrap().len(), 2);
}

#[test]
fn events_published_for_sample_then_alert() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (p, b) = pipeline_with(store, classifier());
    let mut sub = b.subscribe();

    p.ingest(process(42, 95.0), None).unwrap();

    let first: serde_json::Value = serde_json::from_str(&sub.rx.try_recv().unwrap()).unwrap();
    let second: serde_json::Value = serde_json::from_str(&sub.rx.try_recv().unwrap()).unwrap();
    assert!(sub.rx.try_recv().is_err());
    assert_eq!(first["type"], "process");
    assert_eq!(first["data"]["pid"], 42);
    assert_eq!(second["type"], "alert");
    assert_eq!(second["data"]["type"], "HIGH_CPU");
    assert_eq!(second["data"]["severity"], "WARNING");
}

#[test]
fn invalid_sample_is_rejected_and_not_stored() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (p, b) = pipeline_with(store.clone(), classifier());
    let mut sub = b.subscribe();

    let err = p.ingest(process(1, f64::NAN), None).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = p.ingest(stat(140.0), None).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert!(store.query_recent(RecordKind::Process, 10).unwrap().is_empty());
    assert!(store.query_recent(RecordKind::SystemStat, 10).unwrap().is_empty());
    assert!(sub.rx.try_recv().is_err());
}

struct Broken;

impl Rule for Broken {
    fn kind(&self) -> AlertKind {
        AlertKind::ExternalConnection
    }

    fn evaluate(&self, _sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Err("resolver offline".into())
    }
}

#[test]
fn failing_rule_does_not_block_storage() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (p, _) = pipeline_with(store.clone(), Classifier::with_rules(vec![Box::new(Broken)]));
    let sample = Sample::Connection(ConnectionSample {
        protocol: Protocol::Tcp,
        local: "10.0.0.2:40000".parse().unwrap(),
        remote: "93.184.216.34:443".parse().unwrap(),
        state: ConnState::Established,
    });

    let report = p.ingest(sample, None).unwrap();
    assert!(report.alerts.is_empty());
    assert_eq!(report.rule_failures.len(), 1);
    assert_eq!(store.query_recent(RecordKind::Connection, 10).unwrap().len(), 1);
    assert!(store.query_recent(RecordKind::Alert, 10).unwrap().is_empty());
}

/// Delegates to a memory store, failing selected tables on demand.
struct Flaky {
    inner: MemoryStore,
    fail_alerts: AtomicBool,
    fail_processes: AtomicBool,
}

impl Flaky {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_alerts: AtomicBool::new(false),
            fail_processes: AtomicBool::new(false),
        }
    }

    fn check(&self, kind: RecordKind) -> Result<(), Error> {
        let fail = match kind {
            RecordKind::Alert => self.fail_alerts.load(Ordering::SeqCst),
            RecordKind::Process => self.fail_processes.load(Ordering::SeqCst),
            _ => false,
        };
        if fail {
            return Err(Error::StorageUnavailable("disk full".into()));
        }
        Ok(())
    }
}

impl Store for Flaky {
    fn append(&self, body: RecordBody, at: Option<DateTime<Utc>>) -> Result<Record, Error> {
        self.check(body.kind())?;
        self.inner.append(body, at)
    }

    fn query_recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Record>, Error> {
        self.check(kind)?;
        self.inner.query_recent(kind, limit)
    }

    fn query_window(&self, kind: RecordKind, since: DateTime<Utc>) -> Result<Vec<Record>, Error> {
        self.check(kind)?;
        self.inner.query_window(kind, since)
    }
}

#[test]
fn alert_write_failure_keeps_sample() {
    let flaky = Arc::new(Flaky::new());
    flaky.fail_alerts.store(true, Ordering::SeqCst);
    let (p, _) = pipeline_with(flaky.clone(), classifier());

    let report = p.ingest(process(42, 95.0), None).unwrap();
    assert!(report.alerts.is_empty());
    assert_eq!(flaky.inner.query_recent(RecordKind::Process, 10).unwrap().len(), 1);
}

#[test]
fn batch_counts_each_outcome_and_never_aborts() {
    let flaky = Arc::new(Flaky::new());
    let (p, _) = pipeline_with(flaky.clone(), classifier());

    let report = p.ingest_batch(
        vec![
            process(1, 95.0),
            process(2, -1.0),
            stat(10.0),
            process(3, 1.0),
        ],
        None,
    );
    assert_eq!(report.stored, 3);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.alerts, 1);

    flaky.fail_processes.store(true, Ordering::SeqCst);
    let report = p.ingest_batch(vec![process(4, 1.0), stat(12.0)], None);
    assert_eq!(report.failed, 1);
    assert_eq!(report.stored, 1);
}

#[test]
fn unreadable_previous_stat_still_stores_and_reports() {
    struct NoStatReads(MemoryStore);
    impl Store for NoStatReads {
        fn append(&self, body: RecordBody, at: Option<DateTime<Utc>>) -> Result<Record, Error> {
            self.0.append(body, at)
        }
        fn query_recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Record>, Error> {
            if kind == RecordKind::SystemStat {
                return Err(Error::StorageUnavailable("stats index rebuilding".into()));
            }
            self.0.query_recent(kind, limit)
        }
        fn query_window(
            &self,
            kind: RecordKind,
            since: DateTime<Utc>,
        ) -> Result<Vec<Record>, Error> {
            self.0.query_window(kind, since)
        }
    }

    let (p, _) = pipeline_with(Arc::new(NoStatReads(MemoryStore::new())), classifier());
    let report = p.ingest(stat(50.0), None).unwrap();
    let failed: Vec<AlertKind> = report.rule_failures.iter().map(|f| f.kind).collect();
    assert_eq!(failed, vec![AlertKind::CpuSpike, AlertKind::MemorySpike]);
    assert_eq!(report.record.data.kind(), RecordKind::SystemStat);
}

#[test]
fn concurrent_stat_ingest_classifies_each_stat_against_its_predecessor() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (p, _) = pipeline_with(store.clone(), classifier());

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let p = &p;
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let cpu = if (t + i) % 2 == 0 { 10.0 } else { 90.0 };
                    p.ingest(stat(cpu), None).unwrap();
                }
            });
        }
    });

    let mut stats = store::recent::<SystemStatSample>(store.as_ref(), 10_000).unwrap();
    assert_eq!(stats.len(), THREADS * PER_THREAD);
    stats.reverse();
    let rises = stats
        .windows(2)
        .filter(|w| w[1].data.cpu_pct - w[0].data.cpu_pct > 30.0)
        .count();

    let alerts = store::recent::<Alert>(store.as_ref(), 10_000).unwrap();
    assert!(alerts.iter().all(|a| a.data.kind == AlertKind::CpuSpike));
    assert_eq!(alerts.len(), rises);
}
