use std::io::Read;

use lpalink_frame::scan;

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_frames, DecodedFrame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let text = if args.hex == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|err| io_error("failed reading stdin", err))?;
        text
    } else {
        args.hex
    };
    let bytes = parse_hex_dump(&text)?;

    let frames: Vec<DecodedFrame> = scan(&bytes)
        .map(|envelope| DecodedFrame::new(&envelope, args.direction))
        .collect();
    if frames.is_empty() {
        return Err(CliError::new(DATA_INVALID, "no envelope found in input"));
    }

    print_frames(&frames, format);
    Ok(SUCCESS)
}

/// Hex digits with any whitespace, `:` separators and `0x` prefixes removed.
fn parse_hex_dump(text: &str) -> CliResult<Vec<u8>> {
    let digits: String = text
        .split_whitespace()
        .map(|word| word.strip_prefix("0x").unwrap_or(word))
        .flat_map(|word| word.chars().filter(|c| *c != ':'))
        .collect();
    hex::decode(&digits).map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dumps() {
        assert_eq!(parse_hex_dump("ff55aa").unwrap(), vec![0xFF, 0x55, 0xAA]);
        assert_eq!(parse_hex_dump("0xff 55\naa").unwrap(), vec![0xFF, 0x55, 0xAA]);
        assert_eq!(parse_hex_dump("ff:55:aa").unwrap(), vec![0xFF, 0x55, 0xAA]);
        assert!(parse_hex_dump("ff5").is_err());
    }
}
