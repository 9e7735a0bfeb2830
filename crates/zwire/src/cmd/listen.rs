use tracing::info;

use crate::cmd::ListenArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let driver = args.connection.open().await?;
    let mut subscription = match args.node {
        Some(node) => driver.subscribe_device(node),
        None => driver.subscribe_unsolicited(),
    };

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let mut printed = 0usize;
    loop {
        let frame = tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
            frame = subscription.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        print_frame(&frame, format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    driver.shutdown().await;
    Ok(SUCCESS)
}
