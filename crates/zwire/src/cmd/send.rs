use tokio_util::sync::CancellationToken;
use tracing::debug;
use zwire_driver::{CallbackRequest, Driver, DriverError};
use zwire_frame::DataFrame;

use crate::cmd::{AwaitKind, SendArgs};
use crate::config::parse_duration;
use crate::exit::{driver_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{parse_hex, print_frame, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let parameters =
        parse_hex(&args.data).map_err(|err| CliError::new(USAGE, format!("--data: {err}")))?;
    let timeout = parse_duration(&args.timeout)?;
    let driver = args.connection.open().await?;

    let cancel = CancellationToken::new();
    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };

    let result = exchange(&driver, &args, parameters, &cancel).await;
    deadline.abort();
    driver.shutdown().await;

    if let Some(frame) = result.map_err(|err| driver_error("send failed", err))? {
        print_frame(&frame, format);
    }
    Ok(SUCCESS)
}

async fn exchange(
    driver: &Driver,
    args: &SendArgs,
    parameters: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<Option<DataFrame>, DriverError> {
    debug!(function = %args.function, wait = ?args.wait, "sending request");
    match args.wait {
        AwaitKind::None => driver
            .send(DataFrame::request(args.function, parameters), cancel)
            .await
            .map(|()| None),
        AwaitKind::Response => driver
            .send_await_response(DataFrame::request(args.function, parameters), cancel)
            .await
            .map(Some),
        AwaitKind::Callback => driver
            .send_await_callback(CallbackRequest::new(args.function, parameters), cancel)
            .await
            .map(Some),
    }
}
