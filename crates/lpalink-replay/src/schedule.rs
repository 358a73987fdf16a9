//! Replay schedules: the ordered frames to transmit and what should come back.

use std::path::Path;
use std::time::Duration;

use lpalink_frame::{parse_channel, port_name};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReplayError, Result};

/// One frame to transmit, plus the reception it should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Transmit port.
    pub port: u16,
    pub can_id: u32,
    pub payload: Vec<u8>,
    /// Gap to the next entry, on the cumulative schedule.
    pub cycle_time: Duration,
    /// Port the frame is expected to arrive on.
    pub dest_port: u16,
    pub expected_can_id: u32,
    pub expected_payload: Vec<u8>,
    /// Free text for diagnostics.
    pub label: String,
}

impl ScheduleEntry {
    /// An entry expected to come back unchanged on the same port.
    pub fn new(port: u16, can_id: u32, payload: impl Into<Vec<u8>>, cycle_time: Duration) -> Self {
        let payload = payload.into();
        Self {
            port,
            can_id,
            expected_payload: payload.clone(),
            payload,
            cycle_time,
            dest_port: port,
            expected_can_id: can_id,
            label: format!("{} 0x{can_id:X}", port_name(port)),
        }
    }

    /// Expect the frame on another port.
    pub fn expect_port(mut self, dest_port: u16) -> Self {
        self.dest_port = dest_port;
        self
    }

    /// Expect a different identifier on reception.
    pub fn expect_can_id(mut self, can_id: u32) -> Self {
        self.expected_can_id = can_id;
        self
    }

    /// Expect a different payload on reception.
    pub fn expect_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.expected_payload = payload.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// A cell in a schedule row: JSON numbers and strings are both accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(u64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn text(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(s) => s.trim().to_string(),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

/// One row of a tabular schedule.
///
/// The first column set describes the transmitted frame, the `dest_*` set
/// the frame expected back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    #[serde(default, alias = "Channel")]
    pub channel: Option<Cell>,
    #[serde(default, alias = "MsgID", alias = "Msg ID", alias = "MessageID")]
    pub msg_id: Option<Cell>,
    #[serde(default, alias = "MsgValue", alias = "MessageValue", alias = "Value")]
    pub msg_value: Option<Cell>,
    #[serde(default, alias = "CycleTime (ms)", alias = "CycleTime(ms)", alias = "cycle_time")]
    pub cycle_time_ms: Option<Cell>,
    #[serde(default)]
    pub dest_channel: Option<Cell>,
    #[serde(default)]
    pub dest_msg_id: Option<Cell>,
    #[serde(default)]
    pub dest_msg_value: Option<Cell>,
}

impl ScheduleRow {
    /// Decode into an entry. `row` is only used in error messages.
    pub fn decode(&self, row: usize) -> Result<ScheduleEntry> {
        let invalid = |reason: String| ReplayError::InvalidEntry { row, reason };

        let channel = required(&self.channel, "channel").map_err(invalid)?;
        let msg_id = required(&self.msg_id, "msg_id").map_err(invalid)?;
        let msg_value = required(&self.msg_value, "msg_value").map_err(invalid)?;
        let cycle = required(&self.cycle_time_ms, "cycle_time_ms").map_err(invalid)?;

        let port = parse_channel(&channel)
            .ok_or_else(|| invalid(format!("unknown channel {channel:?}")))?;
        let can_id = parse_can_id(&msg_id).map_err(invalid)?;
        let payload = parse_payload(&msg_value).map_err(invalid)?;
        let cycle_time = parse_cycle_ms(&cycle).map_err(invalid)?;

        let dest_channel = optional(&self.dest_channel);
        let dest_port = dest_channel
            .as_deref()
            .and_then(parse_channel)
            .unwrap_or(0);

        let expected_can_id = match optional(&self.dest_msg_id) {
            Some(text) => parse_can_id(&text).map_err(invalid)?,
            None => can_id,
        };
        let expected_payload = match optional(&self.dest_msg_value) {
            Some(text) => parse_payload(&text).map_err(invalid)?,
            None => payload.clone(),
        };

        let label = match dest_channel {
            Some(dest) => format!("{channel} 0x{can_id:X} -> {dest}"),
            None => format!("{channel} 0x{can_id:X}"),
        };

        Ok(ScheduleEntry {
            port,
            can_id,
            payload,
            cycle_time,
            dest_port,
            expected_can_id,
            expected_payload,
            label,
        })
    }
}

/// A row left out of a schedule, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    /// 1-based position in the input.
    pub row: usize,
    pub reason: String,
}

/// An ordered, immutable list of entries consumed once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// Decode rows, skipping the ones that do not describe a valid frame.
    pub fn from_rows(rows: &[ScheduleRow]) -> (Self, Vec<SkippedRow>) {
        let mut entries = Vec::with_capacity(rows.len());
        let mut skipped = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            let number = index + 1;
            match row.decode(number) {
                Ok(entry) => entries.push(entry),
                Err(ReplayError::InvalidEntry { row, reason }) => {
                    warn!(row, %reason, "skipping schedule row");
                    skipped.push(SkippedRow { row, reason });
                }
                Err(err) => {
                    warn!(row = number, error = %err, "skipping schedule row");
                    skipped.push(SkippedRow {
                        row: number,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(entries = entries.len(), skipped = skipped.len(), "schedule decoded");
        (Self { entries }, skipped)
    }

    /// Parse a JSON array of rows.
    pub fn from_json_str(json: &str) -> Result<(Self, Vec<SkippedRow>)> {
        let rows: Vec<ScheduleRow> = serde_json::from_str(json)?;
        Ok(Self::from_rows(&rows))
    }

    /// Load a JSON array of rows from a file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<(Self, Vec<SkippedRow>)> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ReplayError::Schedule {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScheduleEntry> {
        self.entries.iter()
    }

    /// Sum of all cycle times.
    pub fn total_duration(&self) -> Duration {
        self.entries.iter().map(|entry| entry.cycle_time).sum()
    }
}

impl<'a> IntoIterator for &'a Schedule {
    type Item = &'a ScheduleEntry;
    type IntoIter = std::slice::Iter<'a, ScheduleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Parse a CAN identifier: `0x` prefix is hex, anything else decimal.
pub fn parse_can_id(text: &str) -> std::result::Result<u32, String> {
    let text = text.trim();
    let parsed = match strip_hex_prefix(text) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|err| format!("invalid CAN id {text:?}: {err}"))
}

/// Parse a payload: `0x` prefix is hex bytes, anything else UTF-8 text.
pub fn parse_payload(text: &str) -> std::result::Result<Vec<u8>, String> {
    match strip_hex_prefix(text) {
        Some(digits) => {
            let digits: String = digits.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(&digits).map_err(|err| format!("invalid hex payload {text:?}: {err}"))
        }
        None => Ok(text.as_bytes().to_vec()),
    }
}

fn parse_cycle_ms(text: &str) -> std::result::Result<Duration, String> {
    let ms: f64 = text
        .parse()
        .map_err(|err| format!("invalid cycle time {text:?}: {err}"))?;
    if !ms.is_finite() || ms < 0.0 {
        return Err(format!("invalid cycle time {text:?}: must be a non-negative number"));
    }
    Ok(Duration::from_nanos((ms * 1_000_000.0).round() as u64))
}

fn strip_hex_prefix(text: &str) -> Option<&str> {
    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
}

fn required(cell: &Option<Cell>, name: &str) -> std::result::Result<String, String> {
    optional(cell).ok_or_else(|| format!("missing {name}"))
}

fn optional(cell: &Option<Cell>) -> Option<String> {
    cell.as_ref()
        .map(Cell::text)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(channel: &str, id: &str, value: &str, cycle: &str) -> ScheduleRow {
        ScheduleRow {
            channel: Some(channel.into()),
            msg_id: Some(id.into()),
            msg_value: Some(value.into()),
            cycle_time_ms: Some(cycle.into()),
            ..ScheduleRow::default()
        }
    }

    #[test]
    fn decode_hex_row() {
        let entry = row("CANFD2", "0x18DAF110", "0x0102 0304", "10").decode(1).unwrap();
        assert_eq!(entry.port, 10);
        assert_eq!(entry.can_id, 0x18DA_F110);
        assert_eq!(entry.payload, vec![1, 2, 3, 4]);
        assert_eq!(entry.cycle_time, Duration::from_millis(10));
        assert_eq!(entry.dest_port, 0);
        assert_eq!(entry.expected_can_id, entry.can_id);
        assert_eq!(entry.expected_payload, entry.payload);
    }

    #[test]
    fn decode_decimal_id_and_text_payload() {
        let entry = row("CANHS1", "311", "hello", "2.5").decode(1).unwrap();
        assert_eq!(entry.port, 1);
        assert_eq!(entry.can_id, 311);
        assert_eq!(entry.payload, b"hello");
        assert_eq!(entry.cycle_time, Duration::from_micros(2500));
    }

    #[test]
    fn decode_destination_columns() {
        let mut r = row("CANHS1", "0x100", "0xAABB", "5");
        r.dest_channel = Some("CANFD3".into());
        r.dest_msg_id = Some("0x200".into());
        r.dest_msg_value = Some("0xCCDD".into());

        let entry = r.decode(4).unwrap();
        assert_eq!(entry.dest_port, 11);
        assert_eq!(entry.expected_can_id, 0x200);
        assert_eq!(entry.expected_payload, vec![0xCC, 0xDD]);
        assert_eq!(entry.label, "CANHS1 0x100 -> CANFD3");
    }

    #[test]
    fn unknown_destination_resolves_to_port_zero() {
        let mut r = row("LIN2", "0x10", "0x00", "1");
        r.dest_channel = Some("ETH0".into());
        let entry = r.decode(1).unwrap();
        assert_eq!(entry.port, 2);
        assert_eq!(entry.dest_port, 0);
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let cases = [
            (row("", "0x100", "0x00", "10"), "missing channel"),
            (row("CANHS1", "0x100", "", "10"), "missing msg_value"),
            (row("ETH1", "0x100", "0x00", "10"), "unknown channel"),
            (row("CANHS1", "0xZZ", "0x00", "10"), "invalid CAN id"),
            (row("CANHS1", "0x100", "0xABC", "10"), "invalid hex payload"),
            (row("CANHS1", "0x100", "0x00", "-1"), "invalid cycle time"),
        ];
        for (r, expected) in cases {
            let err = r.decode(7).unwrap_err();
            match err {
                ReplayError::InvalidEntry { row, reason } => {
                    assert_eq!(row, 7);
                    assert!(reason.contains(expected), "{reason} vs {expected}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn from_rows_reports_skipped() {
        let rows = vec![
            row("CANHS1", "0x100", "0x01", "10"),
            ScheduleRow::default(),
            row("CANHS2", "0x200", "0x02", "10"),
        ];
        let (schedule, skipped) = Schedule::from_rows(&rows);
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.entries()[1].can_id, 0x200);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].row, 2);
        assert_eq!(skipped[0].reason, "missing channel");
        assert_eq!(schedule.total_duration(), Duration::from_millis(20));
    }

    #[test]
    fn from_json_accepts_numbers_and_aliases() {
        let json = r#"[
            {"channel": "CANHS1", "msg_id": "0x137", "msg_value": "0x0102", "cycle_time_ms": 10},
            {"Channel": "CANFD1", "MsgID": 256, "MsgValue": "text", "CycleTime (ms)": "0.5",
             "dest_channel": "CANFD2"},
            {"channel": "CANHS1"}
        ]"#;
        let (schedule, skipped) = Schedule::from_json_str(json).unwrap();
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.entries()[0].can_id, 0x137);
        assert_eq!(schedule.entries()[1].can_id, 256);
        assert_eq!(schedule.entries()[1].dest_port, 10);
        assert_eq!(schedule.entries()[1].cycle_time, Duration::from_micros(500));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].row, 3);
    }

    #[test]
    fn load_json_missing_file() {
        let err = Schedule::load_json("/nonexistent/lpalink/schedule.json").unwrap_err();
        assert!(matches!(err, ReplayError::Schedule { .. }));
    }

    #[test]
    fn load_json_malformed() {
        let err = Schedule::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ReplayError::Json(_)));
    }

    #[test]
    fn entry_builder() {
        let entry = ScheduleEntry::new(3, 0x321, vec![9], Duration::from_millis(1))
            .expect_port(4)
            .expect_can_id(0x322)
            .expect_payload(vec![8])
            .with_label("custom");
        assert_eq!(entry.dest_port, 4);
        assert_eq!(entry.expected_can_id, 0x322);
        assert_eq!(entry.expected_payload, vec![8]);
        assert_eq!(entry.label, "custom");
        assert_eq!(ScheduleEntry::new(3, 0x10, vec![], Duration::ZERO).label, "CANHS3 0x10");
    }
}
