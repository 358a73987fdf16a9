use lpalink_frame::{assemble_rx, assemble_with, CanHeaderRx, TxOptions};

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_encoded, Direction, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = match args.direction {
        Direction::Tx => {
            let options = TxOptions {
                timestamp_enable: args.can.timestamps,
                fd: args.can.fd,
                brs: args.can.brs,
            };
            assemble_with(&args.data.0, args.can_id, false, args.can.cmd, args.port, options)
        }
        Direction::Rx => {
            let source_port = u8::try_from(args.port).map_err(|_| {
                CliError::new(USAGE, format!("port {} does not fit an RX descriptor", args.port))
            })?;
            let mut header =
                CanHeaderRx::can(source_port, args.can_id, args.timestamp_us.saturating_mul(1_000));
            header.fdf = args.can.fd;
            assemble_rx(&header, &args.data.0, args.can.cmd, args.port)
        }
    }
    .map_err(|err| frame_error("encode failed", err))?;

    print_encoded(&frame, args.port, args.can_id, args.direction, format);
    Ok(SUCCESS)
}
