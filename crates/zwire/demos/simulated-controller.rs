//! Drives a simulated controller over an in-memory channel.
//!
//! Run with:
//!   cargo run -p zwire --example simulated-controller
//!
//! The simulator acknowledges every frame, answers GetVersion with a
//! response and SendData with a response followed by a callback carrying the
//! request's session id, then pushes one unsolicited device notification.

use std::error::Error;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use zwire::driver::{CallbackRequest, Driver, DriverConfig};
use zwire::frame::{encode, try_parse, DataFrame, Frame, FunctionType, ACK};
use zwire::transport::MemoryPort;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let (port, mut peers) = MemoryPort::new();
    let driver = Driver::open(port, DriverConfig::default()).await?;
    let stream = peers.next().await.ok_or("channel was not opened")?;
    let simulator = tokio::spawn(simulate(stream));

    let mut node_five = driver.subscribe_device(5);
    let cancel = CancellationToken::new();

    let version = driver
        .send_await_response(
            DataFrame::request(FunctionType::GetVersion, Vec::new()),
            &cancel,
        )
        .await?;
    println!("version response: {:02X?}", version.parameters().as_ref());

    // node 5, BASIC SET 0xFF, transmit options ACK|AUTO_ROUTE
    let request = CallbackRequest::new(
        FunctionType::SendData,
        vec![0x05, 0x03, 0x20, 0x01, 0xFF, 0x05],
    );
    let callback = driver.send_await_callback(request, &cancel).await?;
    println!("send data callback: {:02X?}", callback.parameters().as_ref());

    if let Some(report) = node_five.recv().await {
        println!("node 5 reported: {:02X?}", report.parameters().as_ref());
    }

    driver.shutdown().await;
    simulator.abort();
    Ok(())
}

async fn simulate(mut stream: DuplexStream) -> std::io::Result<()> {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 64];
    loop {
        let len = stream.read(&mut chunk).await?;
        if len == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&chunk[..len]);
        loop {
            let parsed = try_parse(&pending);
            pending.drain(..parsed.consumed);
            let Some(frame) = parsed.frame else {
                break;
            };
            let Frame::Data(request) = frame else {
                continue;
            };
            stream.write_all(&[ACK]).await?;
            for reply in answer(&request) {
                let bytes = encode(&Frame::Data(reply))
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
                stream.write_all(&bytes).await?;
            }
        }
    }
}

fn answer(request: &DataFrame) -> Vec<DataFrame> {
    match request.function() {
        FunctionType::GetVersion => vec![DataFrame::response(
            FunctionType::GetVersion,
            b"Z-Wave 7.18\0\x07".to_vec(),
        )],
        FunctionType::SendData => {
            let session = request.parameters().last().copied().unwrap_or(0);
            vec![
                DataFrame::response(FunctionType::SendData, vec![0x01]),
                DataFrame::request(FunctionType::SendData, vec![session, 0x00, 0x00, 0x03]),
                // node 5 reports BASIC 0xFF
                DataFrame::request(
                    FunctionType::ApplicationCommandHandler,
                    vec![0x00, 0x05, 0x03, 0x20, 0x03, 0xFF],
                ),
            ]
        }
        _ => Vec::new(),
    }
}
