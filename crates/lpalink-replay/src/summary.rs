use serde::{Serialize, Serializer};

use crate::correlator::ValidationResult;
use crate::schedule::SkippedRow;

/// Counters kept by the sender for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    /// Frames handed to the transport.
    pub sent: u64,
    /// Entries that could not be assembled.
    pub send_failures: u64,
    /// Set when the stop signal cut the schedule short.
    pub stopped: bool,
}

/// Counters kept by the receiver for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    /// Envelopes extracted from the stream.
    pub received_frames: u64,
    /// Envelopes whose CRC trailer did not match.
    pub crc_failures: u64,
    /// Envelopes that were not valid LPA frames, plus oversized candidates.
    pub malformed_frames: u64,
}

/// Min/avg/max latency over passing frames, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub min_ns: i64,
    pub avg_ns: i64,
    pub max_ns: i64,
}

impl LatencyStats {
    /// `None` when there are no samples.
    pub fn from_samples(samples: impl IntoIterator<Item = i64>) -> Option<Self> {
        let mut count = 0i128;
        let mut sum = 0i128;
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for sample in samples {
            count += 1;
            sum += i128::from(sample);
            min = min.min(sample);
            max = max.max(sample);
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            min_ns: min,
            avg_ns: (sum / count) as i64,
            max_ns: max,
        })
    }
}

/// Outcome of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sent: u64,
    pub send_failures: u64,
    pub received_frames: u64,
    pub crc_failures: u64,
    pub malformed_frames: u64,
    /// Received frames that passed validation.
    pub passed: u64,
    /// Received frames that failed validation.
    pub failed: u64,
    /// Transmissions without a passing match.
    pub unmatched: u64,
    pub skipped_entries: u64,
    pub stopped: bool,
    pub latency: Option<LatencyStats>,
    pub skipped: Vec<SkippedRow>,
    pub results: Vec<ValidationResult>,
}

impl RunSummary {
    /// Aggregate the counters and verdicts of a finished run.
    pub fn new(
        sender: SenderStats,
        receiver: ReceiverStats,
        matched: u64,
        skipped: Vec<SkippedRow>,
        results: Vec<ValidationResult>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.valid).count() as u64;
        let failed = results.len() as u64 - passed;
        let latency = LatencyStats::from_samples(
            results
                .iter()
                .filter(|r| r.valid)
                .filter_map(|r| r.delay_ns),
        );

        Self {
            sent: sender.sent,
            send_failures: sender.send_failures,
            received_frames: receiver.received_frames,
            crc_failures: receiver.crc_failures,
            malformed_frames: receiver.malformed_frames,
            passed,
            failed,
            unmatched: sender.sent.saturating_sub(matched),
            skipped_entries: skipped.len() as u64,
            stopped: sender.stopped,
            latency,
            skipped,
            results,
        }
    }

    /// Every transmission came back and no received frame failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.unmatched == 0 && self.send_failures == 0
    }
}

pub(crate) fn serialize_hex<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&hex::encode(bytes))
}

pub(crate) fn serialize_hex_opt<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match bytes {
        Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
        None => serializer.serialize_none(),
    }
}
