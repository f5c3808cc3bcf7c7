use crate::record::ClientId;
use crate::window::Aggregate;
use chrono::{Local, TimeZone};
use std::fmt::Write;
use std::net::SocketAddr;

pub const NO_CLIENTS: &str = "No clients connected.";
pub const OFFLINE: &str = "offline";

/// One occupied slot, aggregated under that slot's lock.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub client_id: ClientId,
    pub address: Option<SocketAddr>,
    pub aggregate: Aggregate,
    /// Staleness at the snapshot instant, not the evaluator's last verdict.
    pub offline: bool,
}

impl SnapshotRow {
    pub fn ip(&self) -> String {
        self.address
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn seen(&self) -> String {
        if self.offline {
            OFFLINE.to_string()
        } else {
            time_of_day(self.aggregate.last.timestamp)
        }
    }
}

/// Registry state captured at `taken_at`. Rendering it twice gives the same bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: u64,
    pub rows: Vec<SnapshotRow>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn offline_count(&self) -> usize {
        self.rows.iter().filter(|r| r.offline).count()
    }

    pub fn row(&self, client_id: &str) -> Option<&SnapshotRow> {
        let id = ClientId::new(client_id);
        self.rows.iter().find(|r| r.client_id == id)
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(128 * (self.rows.len() + 3));
        render_into(self, &mut out);
        out
    }
}

pub fn header() -> String {
    format!(
        "{:<32} {:<15} {:>8} {:>8} {:>8} {:>8} {}",
        "Client", "IP", "Avg Load", "Avg Temp", "Avg Fan", "Avg MHz", "Seen"
    )
}

pub fn render_into(snapshot: &Snapshot, out: &mut String) {
    let _ = writeln!(out, "          {}", date_time(snapshot.taken_at));
    let _ = writeln!(out, "{}", header());

    for row in &snapshot.rows {
        let agg = &row.aggregate;
        let _ = writeln!(
            out,
            "{:<32} {:<15} {:>7.2}% {:>8.2} {:>8} {:>8.2} {}",
            row.client_id,
            row.ip(),
            agg.avg_load,
            agg.avg_temp,
            agg.avg_fan as i32,
            agg.avg_mhz,
            row.seen()
        );
    }

    if snapshot.rows.is_empty() {
        let _ = writeln!(out, "{}", NO_CLIENTS);
    }
}

fn local(ts: u64) -> Option<chrono::DateTime<Local>> {
    Local.timestamp_opt(i64::try_from(ts).ok()?, 0).earliest()
}

/// `YYYY-MM-DD HH:MM:SS` in local time.
pub fn date_time(ts: u64) -> String {
    local(ts)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// `HH:MM:SS` in local time.
pub fn time_of_day(ts: u64) -> String {
    local(ts)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TelemetryRecord;

    fn row(id: &str, offline: bool) -> SnapshotRow {
        let last = TelemetryRecord::new(id, 12.0, 41.5, 1200.0, 1800.0, 1_700_000_000);
        SnapshotRow {
            client_id: ClientId::new(id),
            address: Some(SocketAddr::from(([192, 168, 1, 20], 40000))),
            aggregate: Aggregate {
                avg_load: 12.0,
                avg_temp: 41.5,
                avg_fan: 1800.0,
                avg_mhz: 1200.0,
                samples: 1,
                last,
            },
            offline,
        }
    }

    #[test]
    fn test_empty_snapshot_has_placeholder() {
        let text = Snapshot {
            taken_at: 1_700_000_000,
            rows: vec![],
        }
        .render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], header());
        assert_eq!(lines[2], NO_CLIENTS);
    }

    #[test]
    fn test_row_layout() {
        let snapshot = Snapshot {
            taken_at: 1_700_000_001,
            rows: vec![row("pi-a", false)],
        };
        let text = snapshot.render();
        let line = text.lines().nth(2).unwrap();
        let expected = format!(
            "{:<32} {:<15} {:>7.2}% {:>8.2} {:>8} {:>8.2} {}",
            "pi-a",
            "192.168.1.20",
            12.0,
            41.5,
            1800,
            1200.0,
            time_of_day(1_700_000_000)
        );
        assert_eq!(line, expected);
        assert!(line.contains("  12.00%"));
        assert!(line.contains(" 1200.00 "));
    }

    #[test]
    fn test_offline_row_says_offline() {
        let snapshot = Snapshot {
            taken_at: 1_700_000_100,
            rows: vec![row("pi-a", false), row("pi-b", true)],
        };
        let text = snapshot.render();
        assert!(text.lines().nth(3).unwrap().ends_with(" offline"));
        assert_eq!(snapshot.offline_count(), 1);
        assert!(snapshot.row("pi-b").unwrap().offline);
    }

    #[test]
    fn test_render_is_repeatable() {
        let snapshot = Snapshot {
            taken_at: 1_700_000_050,
            rows: vec![row("pi-a", false), row("pi-b", true)],
        };
        assert_eq!(snapshot.render(), snapshot.clone().render());
    }

    #[test]
    fn test_missing_address_renders_unspecified() {
        let mut r = row("pi-a", false);
        r.address = None;
        assert_eq!(r.ip(), "0.0.0.0");
    }

    #[test]
    fn test_header_columns() {
        assert!(header().starts_with("Client"));
        assert!(header().ends_with("Avg MHz Seen"));
    }
}
