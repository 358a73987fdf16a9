use std::sync::Arc;

use lpalink_replay::{ReplayConfig, ReplaySession, Schedule};
use lpalink_transport::SharedTransport;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, ReplayArgs};
use crate::exit::{replay_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_summary, OutputFormat};

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let (schedule, skipped) = Schedule::load_json(&args.schedule)
        .map_err(|err| replay_error("failed to load schedule", err))?;
    for row in &skipped {
        warn!(row = row.row, reason = %row.reason, "schedule row skipped");
    }
    if schedule.is_empty() {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{}: no usable schedule rows", args.schedule.display()),
        ));
    }
    info!(
        entries = schedule.len(),
        skipped = skipped.len(),
        duration_ms = schedule.total_duration().as_millis() as u64,
        "schedule loaded"
    );

    let config = ReplayConfig {
        command: args.can.cmd,
        timestamp_enable: args.can.timestamps,
        fd: args.can.fd,
        brs: args.can.brs,
        receiver_warmup: parse_duration(&args.warmup)?,
        drain_timeout: parse_duration(&args.drain)?,
        stop_when_matched: !args.full_drain,
        ..ReplayConfig::default()
    };

    let endpoint = args.endpoint.open()?;
    let session = ReplaySession::new(Arc::new(SharedTransport::new(endpoint)), schedule, config)
        .with_skipped(skipped);
    install_ctrlc_handler(session.stop_signal())?;

    let summary = session
        .run()
        .map_err(|err| replay_error("replay failed", err))?;
    print_summary(&summary, format);

    Ok(if summary.is_success() { SUCCESS } else { FAILURE })
}
