use chrono::{DateTime, Duration, TimeZone, Utc};
use sentinel_agent::dedup::dedup_latest;
use sentinel_agent::types::{ConnState, ConnectionSample, ProcessSample, Protocol, Row};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

fn proc_row(id: u64, at: i64, pid: u32, cpu: f64) -> Row<ProcessSample> {
    Row {
        id,
        timestamp: t(at),
        data: ProcessSample {
            pid,
            name: format!("p{pid}"),
            cpu_pct: cpu,
            mem_kb: 1024,
        },
    }
}

#[test]
fn keeps_latest_per_pid_newest_first() {
    let rows = vec![
        proc_row(5, 30, 1, 9.0),
        proc_row(4, 20, 2, 8.0),
        proc_row(3, 20, 1, 7.0),
        proc_row(2, 10, 3, 6.0),
        proc_row(1, 0, 2, 5.0),
    ];
    let out = dedup_latest(&rows);
    let ids: Vec<u64> = out.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![5, 4, 2]);
    assert_eq!(out[0].data.cpu_pct, 9.0);
}

#[test]
fn input_order_does_not_matter_and_is_idempotent() {
    let mut rows = vec![
        proc_row(1, 0, 7, 1.0),
        proc_row(2, 5, 8, 2.0),
        proc_row(3, 5, 7, 3.0),
        proc_row(4, 1, 9, 4.0),
    ];
    let once = dedup_latest(&rows);
    rows.reverse();
    assert_eq!(dedup_latest(&rows), once);
    assert_eq!(dedup_latest(&once), once);
    assert_eq!(once.len(), 3);
}

#[test]
fn equal_timestamps_break_ties_by_id() {
    let rows = vec![proc_row(10, 0, 1, 1.0), proc_row(11, 0, 1, 2.0)];
    let out = dedup_latest(&rows);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, 11);
}

#[test]
fn connections_keyed_by_protocol_and_endpoints() {
    let conn = |id: u64, at: i64, protocol: Protocol, remote: &str, state: ConnState| Row {
        id,
        timestamp: t(at),
        data: ConnectionSample {
            protocol,
            local: "10.0.0.2:50000".parse().unwrap(),
            remote: remote.parse().unwrap(),
            state,
        },
    };
    let rows = vec![
        conn(4, 3, Protocol::Tcp, "1.1.1.1:443", ConnState::TimeWait),
        conn(3, 2, Protocol::Udp, "1.1.1.1:443", ConnState::Other),
        conn(2, 1, Protocol::Tcp, "1.1.1.1:443", ConnState::Established),
        conn(1, 0, Protocol::Tcp, "8.8.8.8:53", ConnState::Established),
    ];
    let out = dedup_latest(&rows);
    let ids: Vec<u64> = out.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![4, 3, 1]);
    assert_eq!(out[0].data.state, ConnState::TimeWait);
}

#[test]
fn empty_window() {
    let rows: Vec<Row<ProcessSample>> = Vec::new();
    assert!(dedup_latest(&rows).is_empty());
}
