use std::sync::Arc;
use std::time::{Duration, Instant};

use lpalink_frame::{EnvelopeReader, LpaWriter, TxOptions};
use lpalink_transport::{SharedTransport, Transport};
use tracing::info;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_frames, DecodedFrame, Direction, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait = args.wait.as_deref().map(parse_duration).transpose()?;
    let transport = Arc::new(SharedTransport::new(args.endpoint.open()?));

    let options = TxOptions {
        timestamp_enable: args.can.timestamps,
        fd: args.can.fd,
        brs: args.can.brs,
    };
    let writer = LpaWriter::with_options(Arc::clone(&transport), args.can.cmd, options);
    let written = writer
        .send(args.port, args.can_id, &args.data.0)
        .map_err(|err| frame_error("send failed", err))?;
    info!(port = args.port, can_id = args.can_id, written, "frame sent");

    if let Some(wait) = wait {
        let frames = collect_for(&mut EnvelopeReader::new(transport), wait)
            .map_err(|err| frame_error("receive failed", err))?;
        let decoded: Vec<_> = frames
            .iter()
            .map(|envelope| DecodedFrame::new(envelope, Direction::Rx))
            .collect();
        print_frames(&decoded, format);
    }

    Ok(SUCCESS)
}

/// Gather every envelope that arrives within `window`.
fn collect_for<T: Transport>(
    reader: &mut EnvelopeReader<T>,
    window: Duration,
) -> lpalink_frame::Result<Vec<lpalink_frame::Envelope>> {
    let deadline = Instant::now() + window;
    let mut frames = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(frames);
        }
        if reader.wait_readable(Some(remaining))? {
            frames.extend(reader.poll_frames()?);
        }
    }
}
