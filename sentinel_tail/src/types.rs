//! Live-feed messages as sent by the agent: `{"type": ..., "data": {...}}`.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl FeedEvent {
    /// One human-readable line, e.g. `[ALERT] WARNING HIGH_CPU: Process x using excessive CPU`.
    pub fn summary_line(&self) -> String {
        let d = &self.data;
        let body = match self.event_type.as_str() {
            "process" => format!(
                "pid={} {} cpu={:.1}% mem={}KB",
                num(d, "pid"),
                text(d, "name"),
                float(d, "cpu_pct"),
                num(d, "mem_kb"),
            ),
            "network" => format!(
                "{} {} -> {} {}",
                text(d, "protocol"),
                text(d, "local"),
                text(d, "remote"),
                text(d, "state"),
            ),
            "system_stats" => format!(
                "cpu={:.1}% mem={:.1}% disk={:.1}% load={:.2}",
                float(d, "cpu_pct"),
                float(d, "mem_pct"),
                float(d, "disk_pct"),
                float(d, "load_avg"),
            ),
            "alert" => {
                let details = text(d, "details");
                let mut line = format!(
                    "{} {}: {}",
                    text(d, "severity"),
                    text(d, "type"),
                    text(d, "message")
                );
                if !details.is_empty() {
                    line.push_str(&format!(" ({details})"));
                }
                line
            }
            _ => d.to_string(),
        };
        format!("[{}] {body}", self.event_type.to_uppercase())
    }
}

fn text<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn num(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn float(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}
