use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lpalink_frame::{
    command_name, disassemble, disassemble_tx, port_name, Envelope, FrameError, LpaFrame,
};
use lpalink_replay::{GatewayStats, RunSummary};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Which CAN descriptor an LPA frame carries.
#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    /// 15-byte descriptor of frames coming from the gateway.
    Rx,
    /// 5-byte descriptor of frames sent to the gateway.
    Tx,
}

/// One envelope with its LPA interpretation, for display.
#[derive(Debug, Serialize)]
pub struct DecodedFrame {
    pub cmd: u16,
    pub cmd_name: &'static str,
    pub port: u16,
    pub port_name: String,
    pub len: usize,
    pub crc: String,
    pub crc_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can: Option<CanView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CanView {
    pub can_id: u32,
    pub ide: bool,
    pub fdf: bool,
    pub rtr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ns: Option<u64>,
    pub payload: String,
}

impl DecodedFrame {
    pub fn new(envelope: &Envelope, direction: Direction) -> Self {
        let (can, error) = match can_view(&envelope.raw, direction) {
            Ok(view) => (Some(view), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            cmd: envelope.field1,
            cmd_name: command_name(envelope.field1),
            port: envelope.field2,
            port_name: port_name(envelope.field2),
            len: envelope.payload.len(),
            crc: format!("{:04x}", envelope.crc),
            crc_valid: envelope.crc_valid,
            can,
            error,
        }
    }

    fn can_summary(&self) -> String {
        match (&self.can, &self.error) {
            (Some(can), _) => format!(
                "id=0x{:X}{} payload={}",
                can.can_id,
                if can.ide { " ext" } else { "" },
                if can.payload.is_empty() { "-" } else { can.payload.as_str() }
            ),
            (None, Some(err)) => format!("<{err}>"),
            (None, None) => String::new(),
        }
    }
}

fn can_view(raw: &[u8], direction: Direction) -> Result<CanView, FrameError> {
    let payload = |lpa: &LpaFrame| hex::encode(&lpa.payload);
    match direction {
        Direction::Rx => {
            let lpa = disassemble(raw)?;
            let header = lpa.rx_header()?;
            Ok(CanView {
                can_id: header.resolved_can_id(),
                ide: header.ide,
                fdf: header.fdf,
                rtr: header.rtr,
                source_port: Some(header.source_port),
                timestamp_ns: Some(header.timestamp_ns()),
                payload: payload(&lpa),
            })
        }
        Direction::Tx => {
            let lpa = disassemble_tx(raw)?;
            let header = lpa.tx_header()?;
            Ok(CanView {
                can_id: header.can_id,
                ide: header.ide,
                fdf: header.fdf,
                rtr: header.rtr,
                source_port: None,
                timestamp_ns: None,
                payload: payload(&lpa),
            })
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_frames(frames: &[DecodedFrame], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for frame in frames {
                print_json(frame);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CMD", "PORT", "LEN", "CRC", "CAN"]);
            for frame in frames {
                table.add_row(vec![
                    frame.cmd_name.to_string(),
                    frame.port_name.clone(),
                    frame.len.to_string(),
                    crc_cell(frame),
                    frame.can_summary(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for frame in frames {
                println!(
                    "cmd={} ({}) port={} ({}) len={} crc={} {}",
                    frame.cmd,
                    frame.cmd_name,
                    frame.port,
                    frame.port_name,
                    frame.len,
                    crc_cell(frame),
                    frame.can_summary()
                );
            }
        }
    }
}

fn crc_cell(frame: &DecodedFrame) -> String {
    if frame.crc_valid {
        frame.crc.clone()
    } else {
        format!("{} (bad)", frame.crc)
    }
}

#[derive(Serialize)]
struct EncodedOutput<'a> {
    frame: String,
    len: usize,
    port: u16,
    can_id: u32,
    direction: &'a str,
}

pub fn print_encoded(frame: &[u8], port: u16, can_id: u32, direction: Direction, format: OutputFormat) {
    let hex = hex::encode(frame);
    let direction = match direction {
        Direction::Rx => "rx",
        Direction::Tx => "tx",
    };
    match format {
        OutputFormat::Json => print_json(&EncodedOutput {
            frame: hex,
            len: frame.len(),
            port,
            can_id,
            direction,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DIRECTION", "PORT", "CAN ID", "LEN", "FRAME"])
                .add_row(vec![
                    direction.to_string(),
                    port_name(port),
                    format!("0x{can_id:X}"),
                    frame.len().to_string(),
                    hex,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{hex}"),
    }
}

pub fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut counters = Table::new();
            counters
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "SENT", "RECEIVED", "PASSED", "FAILED", "UNMATCHED", "CRC", "MALFORMED",
                    "SKIPPED", "LATENCY (us)",
                ])
                .add_row(vec![
                    summary.sent.to_string(),
                    summary.received_frames.to_string(),
                    summary.passed.to_string(),
                    summary.failed.to_string(),
                    summary.unmatched.to_string(),
                    summary.crc_failures.to_string(),
                    summary.malformed_frames.to_string(),
                    summary.skipped_entries.to_string(),
                    latency_cell(summary),
                ]);
            println!("{counters}");

            let failures: Vec<_> = summary.results.iter().filter(|r| !r.valid).collect();
            if !failures.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["ENTRY", "LABEL", "REASON", "PORT", "CAN ID", "PAYLOAD"]);
                for result in failures {
                    table.add_row(vec![
                        result
                            .matched_index
                            .map_or_else(|| "-".to_string(), |i| i.to_string()),
                        result.label.clone().unwrap_or_default(),
                        result
                            .reason
                            .map_or_else(String::new, |reason| reason.to_string()),
                        port_name(result.received_port),
                        format!("0x{:X}", result.received_can_id),
                        hex::encode(&result.received_payload),
                    ]);
                }
                println!("{table}");
            }
        }
        OutputFormat::Pretty => {
            println!(
                "sent={} received={} passed={} failed={} unmatched={} crc_failures={} malformed={} skipped={} latency_us={}",
                summary.sent,
                summary.received_frames,
                summary.passed,
                summary.failed,
                summary.unmatched,
                summary.crc_failures,
                summary.malformed_frames,
                summary.skipped_entries,
                latency_cell(summary)
            );
            for result in summary.results.iter().filter(|r| !r.valid) {
                println!(
                    "  FAIL {} {:?} port={} id=0x{:X}",
                    result.label.as_deref().unwrap_or("-"),
                    result.reason,
                    result.received_port,
                    result.received_can_id
                );
            }
        }
    }
}

fn latency_cell(summary: &RunSummary) -> String {
    match summary.latency {
        Some(latency) => format!(
            "{:.1}/{:.1}/{:.1}",
            latency.min_ns as f64 / 1_000.0,
            latency.avg_ns as f64 / 1_000.0,
            latency.max_ns as f64 / 1_000.0
        ),
        None => "-".to_string(),
    }
}

pub fn print_gateway_stats(stats: &GatewayStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["FORWARDED", "REJECTED"])
                .add_row(vec![stats.forwarded.to_string(), stats.rejected.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("forwarded={} rejected={}", stats.forwarded, stats.rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use lpalink_frame::{assemble, assemble_rx, CanHeaderRx, CMD_AP_TEST};

    use super::*;

    #[test]
    fn decodes_rx_frame() {
        let header = CanHeaderRx::can(2, 0x1ABCDE, 2_000);
        let raw = assemble_rx(&header, &[0xDE, 0xAD], CMD_AP_TEST, 2).unwrap();
        let envelope = Envelope::parse(&raw).unwrap();

        let decoded = DecodedFrame::new(&envelope, Direction::Rx);
        assert_eq!(decoded.cmd_name, "AP_TEST");
        assert_eq!(decoded.port_name, "CANHS2");
        let can = decoded.can.expect("can view");
        assert_eq!(can.can_id, 0x1ABCDE);
        assert!(can.ide);
        assert_eq!(can.timestamp_ns, Some(2_000));
        assert_eq!(can.payload, "dead");
    }

    #[test]
    fn decodes_tx_frame() {
        let raw = assemble(b"\x01", 0x137, false, CMD_AP_TEST, 9).unwrap();
        let envelope = Envelope::parse(&raw).unwrap();

        let decoded = DecodedFrame::new(&envelope, Direction::Tx);
        assert_eq!(decoded.port_name, "CANFD1");
        let can = decoded.can.expect("can view");
        assert_eq!(can.can_id, 0x137);
        assert!(!can.ide);
        assert_eq!(can.source_port, None);
    }

    #[test]
    fn short_frames_carry_an_error() {
        let raw = lpalink_frame::build(CMD_AP_TEST, 1, &[0x00; 2]).unwrap();
        let envelope = Envelope::parse(&raw).unwrap();
        let decoded = DecodedFrame::new(&envelope, Direction::Rx);
        assert!(decoded.can.is_none());
        assert!(decoded.error.is_some());
    }
}
