use std::io::Write;

use sentinel_agent::classifier::{Classifier, Context, Rule};
use sentinel_agent::config::ClassifierConfig;
use sentinel_agent::types::{
    Alert, AlertKind, ConnState, ConnectionSample, ProcessSample, Protocol, Sample, Severity,
    SystemStatSample,
};

fn cfg() -> ClassifierConfig {
    ClassifierConfig {
        core_count: Some(4),
        ..ClassifierConfig::default()
    }
}

fn classifier() -> Classifier {
    Classifier::new(&cfg()).expect("classifier")
}

fn kinds(alerts: &[Alert]) -> Vec<AlertKind> {
    alerts.iter().map(|a| a.kind).collect()
}

fn process(pid: u32, name: &str, cpu: f64, mem_kb: u64) -> Sample {
    Sample::Process(ProcessSample {
        pid,
        name: name.into(),
        cpu_pct: cpu,
        mem_kb,
    })
}

fn conn(local: &str, remote: &str, state: ConnState) -> Sample {
    Sample::Connection(ConnectionSample {
        protocol: Protocol::Tcp,
        local: local.parse().unwrap(),
        remote: remote.parse().unwrap(),
        state,
    })
}

fn stat(cpu: f64, mem: f64, load: f64) -> SystemStatSample {
    SystemStatSample {
        cpu_pct: cpu,
        mem_pct: mem,
        disk_pct: 10.0,
        load_avg: load,
    }
}

#[test]
fn busy_process_raises_single_high_cpu_warning() {
    let out = classifier().classify(&process(42, "stress", 95.0, 2048), &Context::default());
    assert!(out.failures.is_empty());
    assert_eq!(kinds(&out.alerts), vec![AlertKind::HighCpu]);
    assert_eq!(out.alerts[0].severity, Severity::Warning);
    assert!(out.alerts[0].details.contains("PID: 42"));
}

#[test]
fn memory_threshold_is_exclusive() {
    let c = classifier();
    let at = c.classify(&process(1, "a", 0.0, 1_048_576), &Context::default());
    assert!(at.alerts.is_empty());
    let above = c.classify(&process(1, "a", 0.0, 1_048_577), &Context::default());
    assert_eq!(kinds(&above.alerts), vec![AlertKind::HighMemory]);
}

#[test]
fn established_external_connection_is_info_only() {
    let out = classifier().classify(
        &conn("127.0.0.1:5000", "93.184.216.34:443", ConnState::Established),
        &Context::default(),
    );
    assert_eq!(kinds(&out.alerts), vec![AlertKind::ExternalConnection]);
    assert_eq!(out.alerts[0].severity, Severity::Info);
}

#[test]
fn loopback_and_non_established_are_not_external() {
    let c = classifier();
    for sample in [
        conn("127.0.0.1:5000", "127.0.0.1:6000", ConnState::Established),
        conn("[::1]:5000", "[::1]:6000", ConnState::Established),
        conn("10.0.0.2:5000", "93.184.216.34:443", ConnState::TimeWait),
        conn("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen),
    ] {
        assert!(c.classify(&sample, &Context::default()).alerts.is_empty());
    }
}

#[test]
fn suspicious_port_raises_one_alert_even_when_both_ends_match() {
    let c = classifier();
    let out = c.classify(
        &conn("127.0.0.1:4444", "127.0.0.1:31337", ConnState::Established),
        &Context::default(),
    );
    assert_eq!(kinds(&out.alerts), vec![AlertKind::SuspiciousPort]);
    assert_eq!(out.alerts[0].severity, Severity::Warning);

    let listen = c.classify(
        &conn("0.0.0.0:4444", "0.0.0.0:0", ConnState::Listen),
        &Context::default(),
    );
    assert_eq!(kinds(&listen.alerts), vec![AlertKind::SuspiciousPort]);
    assert!(listen.alerts[0].message.contains("4444"));
}

#[test]
fn cpu_spike_only_on_second_sample() {
    let c = classifier();
    let first = Sample::SystemStat(stat(40.0, 20.0, 0.1));
    let second = Sample::SystemStat(stat(85.0, 20.0, 0.1));

    let out1 = c.classify(&first, &Context::default());
    assert!(out1.alerts.is_empty());

    let out2 = c.classify(&second, &Context::with_previous(stat(40.0, 20.0, 0.1)));
    assert_eq!(kinds(&out2.alerts), vec![AlertKind::CpuSpike]);
    assert_eq!(out2.alerts[0].severity, Severity::Error);
}

#[test]
fn spike_needs_strictly_more_than_delta() {
    let c = classifier();
    let ctx = Context::with_previous(stat(10.0, 10.0, 0.0));
    assert!(c.classify(&Sample::SystemStat(stat(40.0, 40.0, 0.0)), &ctx).alerts.is_empty());
    let out = c.classify(&Sample::SystemStat(stat(10.0, 41.0, 0.0)), &ctx);
    assert_eq!(kinds(&out.alerts), vec![AlertKind::MemorySpike]);
}

#[test]
fn overload_scales_with_core_count() {
    let c = classifier();
    // 4 cores x 2.0
    let at_limit = c.classify(&Sample::SystemStat(stat(1.0, 1.0, 8.0)), &Context::default());
    assert!(at_limit.alerts.is_empty());
    let out = c.classify(&Sample::SystemStat(stat(1.0, 1.0, 8.5)), &Context::default());
    assert_eq!(kinds(&out.alerts), vec![AlertKind::SystemOverload]);
    assert_eq!(out.alerts[0].severity, Severity::Critical);
}

#[test]
fn unreadable_previous_fails_only_spike_rules() {
    let ctx = Context {
        previous_stat: Err("storage unavailable: disk gone".into()),
    };
    let out = classifier().classify(&Sample::SystemStat(stat(99.0, 99.0, 100.0)), &ctx);
    assert_eq!(kinds(&out.alerts), vec![AlertKind::SystemOverload]);
    let failed: Vec<AlertKind> = out.failures.iter().map(|f| f.kind).collect();
    assert_eq!(failed, vec![AlertKind::CpuSpike, AlertKind::MemorySpike]);
}

#[test]
fn unknown_process_needs_an_allowlist() {
    let sample = process(7, "miner", 1.0, 10);
    assert!(classifier().classify(&sample, &Context::default()).alerts.is_empty());

    let with_list = Classifier::new(&ClassifierConfig {
        process_allowlist: Some(vec!["sshd".into(), "bash".into()]),
        ..cfg()
    })
    .unwrap();
    let out = with_list.classify(&sample, &Context::default());
    assert_eq!(kinds(&out.alerts), vec![AlertKind::UnknownProcess]);
    assert_eq!(out.alerts[0].severity, Severity::Warning);
    assert!(with_list
        .classify(&process(8, "sshd", 1.0, 10), &Context::default())
        .alerts
        .is_empty());
}

#[test]
fn allowlist_file_skips_comments_and_blanks() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "# learned names\nsystemd\n\n  nginx  \n#bash").unwrap();
    let c = Classifier::new(&ClassifierConfig {
        allowlist_file: Some(f.path().to_path_buf()),
        ..cfg()
    })
    .unwrap();
    let ctx = Context::default();
    assert!(c.classify(&process(1, "nginx", 0.0, 1), &ctx).alerts.is_empty());
    assert_eq!(
        kinds(&c.classify(&process(2, "bash", 0.0, 1), &ctx).alerts),
        vec![AlertKind::UnknownProcess]
    );
}

#[test]
fn missing_allowlist_file_is_a_setup_error() {
    let res = Classifier::new(&ClassifierConfig {
        allowlist_file: Some("/nonexistent/sentinel/allow.txt".into()),
        ..cfg()
    });
    assert!(res.is_err());
}

#[test]
fn thresholds_come_from_config() {
    let c = Classifier::new(&ClassifierConfig {
        high_cpu_pct: 10.0,
        suspicious_ports: [8080].into_iter().collect(),
        ..cfg()
    })
    .unwrap();
    let ctx = Context::default();
    assert_eq!(
        kinds(&c.classify(&process(1, "a", 11.0, 1), &ctx).alerts),
        vec![AlertKind::HighCpu]
    );
    assert_eq!(
        kinds(&c.classify(&conn("127.0.0.1:8080", "127.0.0.1:1", ConnState::Listen), &ctx).alerts),
        vec![AlertKind::SuspiciousPort]
    );
    assert!(c
        .classify(&conn("127.0.0.1:4444", "127.0.0.1:1", ConnState::Listen), &ctx)
        .alerts
        .is_empty());
}

#[test]
fn classification_is_deterministic() {
    let c = classifier();
    let ctx = Context::with_previous(stat(5.0, 5.0, 0.0));
    let samples = [
        process(42, "stress", 95.0, 5_000_000),
        conn("10.0.0.2:4444", "93.184.216.34:443", ConnState::Established),
        Sample::SystemStat(stat(90.0, 90.0, 50.0)),
    ];
    for s in &samples {
        let a = c.classify(s, &ctx).alerts;
        for _ in 0..5 {
            assert_eq!(c.classify(s, &ctx).alerts, a);
        }
    }
}

struct Exploding;

impl Rule for Exploding {
    fn kind(&self) -> AlertKind {
        AlertKind::HighCpu
    }

    fn evaluate(&self, _sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        panic!("boom")
    }
}

struct Always(AlertKind);

impl Rule for Always {
    fn kind(&self) -> AlertKind {
        self.0
    }

    fn evaluate(&self, _sample: &Sample, _ctx: &Context) -> Result<Option<Alert>, String> {
        Ok(Some(Alert::new(self.0, "always", "")))
    }
}

#[test]
fn panicking_rule_is_isolated() {
    let c = Classifier::with_rules(vec![
        Box::new(Exploding),
        Box::new(Always(AlertKind::HighMemory)),
    ]);
    let out = c.classify(&process(1, "x", 0.0, 0), &Context::default());
    assert_eq!(kinds(&out.alerts), vec![AlertKind::HighMemory]);
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].kind, AlertKind::HighCpu);
    assert!(out.failures[0].reason.contains("boom"));
}
