use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("lpalink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: lpalink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("LPALINK_BUILD_TARGET"));
    println!("profile: {}", env!("LPALINK_BUILD_PROFILE"));
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "envelope: magic=ff55aa crc16=0x1021 max_payload={}",
        lpalink_frame::MAX_PAYLOAD
    );
    println!("features: replay={}, cli=true", cfg!(feature = "replay"));

    Ok(SUCCESS)
}
