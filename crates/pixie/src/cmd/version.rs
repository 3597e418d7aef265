use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("pixie {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: pixie");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", option_env!("PIXIE_BUILD_TARGET").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: bincode={}, cli=true",
        cfg!(feature = "bincode")
    );
    println!(
        "wire: i32-le length prefix, max payload {} bytes",
        pixie_frame::DEFAULT_MAX_PAYLOAD
    );

    Ok(SUCCESS)
}
