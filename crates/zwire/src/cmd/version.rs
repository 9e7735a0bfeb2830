use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("zwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: zwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("ZWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "transports: serial={}, unix={}, memory=true",
        cfg!(unix),
        cfg!(unix)
    );
    println!(
        "protocol: ack_timeout={}ms, attempts={}, startup_timeout={}ms",
        zwire_driver::ACK_TIMEOUT.as_millis(),
        zwire_driver::MAX_ATTEMPTS,
        zwire_driver::STARTUP_TIMEOUT.as_millis()
    );

    Ok(SUCCESS)
}
