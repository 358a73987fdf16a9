//! Matching received frames back to the transmissions that produced them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::summary::{serialize_hex, serialize_hex_opt};

/// A transmitted frame. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    pub sequence_index: u64,
    /// Clock reading taken right after the transport write returned.
    pub send_timestamp_ns: u64,
    pub can_id: u32,
    pub port: u16,
    pub payload: Vec<u8>,
    pub expected_dest_port: u16,
    pub expected_can_id: u32,
    pub expected_payload: Vec<u8>,
    pub label: String,
}

/// Append-only log of transmissions, written by the sender and read by the
/// receiver.
#[derive(Debug, Default)]
pub struct SendLog {
    records: RwLock<Vec<SendRecord>>,
}

impl SendLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; its index must be the next in sequence.
    pub fn append(&self, record: SendRecord) {
        let mut records = self.write();
        debug_assert_eq!(record.sequence_index, records.len() as u64);
        records.push(record);
    }

    /// Index the next appended record will get.
    pub fn next_index(&self) -> u64 {
        self.read().len() as u64
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of every record so far.
    pub fn records(&self) -> Vec<SendRecord> {
        self.read().clone()
    }

    /// The record for `can_id` sent closest to `timestamp_ns`.
    ///
    /// A record is a candidate when either its transmitted or its expected
    /// identifier equals `can_id`. Ties go to the lowest sequence index.
    pub fn nearest(&self, can_id: u32, timestamp_ns: u64) -> Option<SendRecord> {
        let records = self.read();
        records
            .iter()
            .filter(|record| record.can_id == can_id || record.expected_can_id == can_id)
            .min_by_key(|record| {
                (
                    record.send_timestamp_ns.abs_diff(timestamp_ns),
                    record.sequence_index,
                )
            })
            .cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<SendRecord>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<SendRecord>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A received frame that passed magic and CRC checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Source port from the RX descriptor.
    pub port: u16,
    /// Identifier resolved by the IDE flag.
    pub can_id: u32,
    pub payload: Vec<u8>,
    /// Local clock reading when the read returned.
    pub receive_timestamp_ns: u64,
    /// Timestamp reported by the device in the RX descriptor.
    pub device_timestamp_ns: u64,
}

/// Why a received frame failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    NoMatch,
    IdMismatch,
    PortMismatch,
    PayloadMismatch,
}

impl std::fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            MismatchReason::NoMatch => "no matching transmission",
            MismatchReason::IdMismatch => "CAN id mismatch",
            MismatchReason::PortMismatch => "port mismatch",
            MismatchReason::PayloadMismatch => "payload mismatch",
        };
        f.write_str(text)
    }
}

/// Verdict for one received frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// First failing check; `None` when valid.
    pub reason: Option<MismatchReason>,
    pub matched_index: Option<u64>,
    /// Receive time minus send time.
    pub delay_ns: Option<i64>,
    pub received_port: u16,
    pub received_can_id: u32,
    #[serde(serialize_with = "serialize_hex")]
    pub received_payload: Vec<u8>,
    pub receive_timestamp_ns: u64,
    pub expected_port: Option<u16>,
    pub expected_can_id: Option<u32>,
    #[serde(serialize_with = "serialize_hex_opt")]
    pub expected_payload: Option<Vec<u8>>,
    pub port_match: bool,
    pub id_match: bool,
    pub payload_match: bool,
    pub label: Option<String>,
}

/// Validates received frames against the send log and keeps the verdicts.
#[derive(Debug)]
pub struct Correlator {
    log: Arc<SendLog>,
    results: Mutex<Vec<ValidationResult>>,
}

impl Correlator {
    pub fn new(log: Arc<SendLog>) -> Self {
        Self {
            log,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Compute the verdict for `frame` against the log as it is right now.
    pub fn correlate(&self, frame: &ReceivedFrame) -> ValidationResult {
        let Some(record) = self.log.nearest(frame.can_id, frame.receive_timestamp_ns) else {
            return ValidationResult {
                valid: false,
                reason: Some(MismatchReason::NoMatch),
                matched_index: None,
                delay_ns: None,
                received_port: frame.port,
                received_can_id: frame.can_id,
                received_payload: frame.payload.clone(),
                receive_timestamp_ns: frame.receive_timestamp_ns,
                expected_port: None,
                expected_can_id: None,
                expected_payload: None,
                port_match: false,
                id_match: false,
                payload_match: false,
                label: None,
            };
        };

        let id_match = frame.can_id == record.expected_can_id;
        let port_match = frame.port == record.expected_dest_port;
        let payload_match = frame.payload == record.expected_payload;
        let reason = if !id_match {
            Some(MismatchReason::IdMismatch)
        } else if !port_match {
            Some(MismatchReason::PortMismatch)
        } else if !payload_match {
            Some(MismatchReason::PayloadMismatch)
        } else {
            None
        };
        let delay_ns = signed_delta(frame.receive_timestamp_ns, record.send_timestamp_ns);

        ValidationResult {
            valid: reason.is_none(),
            reason,
            matched_index: Some(record.sequence_index),
            delay_ns: Some(delay_ns),
            received_port: frame.port,
            received_can_id: frame.can_id,
            received_payload: frame.payload.clone(),
            receive_timestamp_ns: frame.receive_timestamp_ns,
            expected_port: Some(record.expected_dest_port),
            expected_can_id: Some(record.expected_can_id),
            expected_payload: Some(record.expected_payload),
            port_match,
            id_match,
            payload_match,
            label: Some(record.label),
        }
    }

    /// Store a verdict.
    pub fn record(&self, result: ValidationResult) {
        match result.reason {
            None => debug!(
                index = ?result.matched_index,
                delay_ns = ?result.delay_ns,
                can_id = result.received_can_id,
                "frame validated"
            ),
            Some(reason) => warn!(
                index = ?result.matched_index,
                can_id = result.received_can_id,
                port = result.received_port,
                %reason,
                "frame failed validation"
            ),
        }
        self.lock().push(result);
    }

    /// Correlate and store in one step.
    pub fn validate(&self, frame: &ReceivedFrame) -> ValidationResult {
        let result = self.correlate(frame);
        self.record(result.clone());
        result
    }

    /// Number of distinct transmissions with at least one passing match.
    pub fn matched_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|result| result.valid)
            .filter_map(|result| result.matched_index)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Copy of every verdict so far.
    pub fn results(&self) -> Vec<ValidationResult> {
        self.lock().clone()
    }

    pub fn into_results(self) -> Vec<ValidationResult> {
        self.results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log(&self) -> &Arc<SendLog> {
        &self.log
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ValidationResult>> {
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn signed_delta(later: u64, earlier: u64) -> i64 {
    if later >= earlier {
        i64::try_from(later - earlier).unwrap_or(i64::MAX)
    } else {
        i64::try_from(earlier - later).map_or(i64::MIN, |d| -d)
    }
}
