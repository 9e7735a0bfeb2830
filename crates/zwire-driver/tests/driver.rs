mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use zwire_driver::{CallbackRequest, Driver, DriverConfig, DriverError, ResetOutcome};
use zwire_frame::{DataFrame, FunctionType, MessageType};
use zwire_transport::{MemoryPeers, MemoryPort};

use common::{wire, Controller};

async fn start() -> (Driver, Controller, MemoryPeers) {
    let (port, mut peers) = MemoryPort::new();
    let driver = Driver::open(port, DriverConfig::default()).await.unwrap();
    let controller = Controller::attach(&mut peers).await;
    (driver, controller, peers)
}

fn send_data_request() -> CallbackRequest {
    // node 5, two command bytes (BASIC GET), transmit options
    CallbackRequest::new(
        FunctionType::SendData,
        Bytes::from_static(&[0x05, 0x02, 0x20, 0x02, 0x25]),
    )
}

fn session_of(request: &DataFrame) -> u8 {
    *request.parameters().last().expect("session byte")
}

#[tokio::test]
async fn response_completes_request() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let request = DataFrame::request(FunctionType::GetVersion, Bytes::new());
    let (response, ()) = tokio::join!(driver.send_await_response(request, &cancel), async {
        let received = controller.expect_data().await;
        assert_eq!(received.function(), FunctionType::GetVersion);
        controller.ack().await;
        controller
            .send_data(DataFrame::response(
                FunctionType::GetVersion,
                Bytes::from_static(b"Z-Wave 7.18\0\x07"),
            ))
            .await;
        controller.expect_ack().await;
    });

    let response = response.unwrap();
    assert_eq!(response.message_type(), MessageType::Response);
    assert_eq!(response.parameters().last(), Some(&0x07));
}

#[tokio::test]
async fn response_then_callback_completes_with_callback() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let (callback, session) = tokio::join!(
        driver.send_await_callback(send_data_request(), &cancel),
        async {
            let request = controller.expect_data().await;
            let session = session_of(&request);
            assert_ne!(session, 0);
            assert_eq!(request.parameters().len(), 6);
            controller.ack().await;

            controller
                .send_data(DataFrame::response(FunctionType::SendData, vec![0x01]))
                .await;
            controller.expect_ack().await;
            controller
                .send_data(DataFrame::request(
                    FunctionType::SendData,
                    vec![session, 0x00, 0x00, 0x02],
                ))
                .await;
            controller.expect_ack().await;
            session
        }
    );

    let callback = callback.unwrap();
    assert_eq!(callback.function(), FunctionType::SendData);
    assert_eq!(callback.parameters()[0], session);
    assert_eq!(driver.pending_callbacks(), 0);
}

#[tokio::test]
async fn callback_right_behind_its_response_is_matched() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let (callback, ()) = tokio::join!(
        driver.send_await_callback(send_data_request(), &cancel),
        async {
            let request = controller.expect_data().await;
            let session = session_of(&request);
            controller.ack().await;

            let mut burst = wire(&DataFrame::response(FunctionType::SendData, vec![0x01]));
            burst.extend(wire(&DataFrame::request(
                FunctionType::SendData,
                vec![session, 0x00],
            )));
            controller.write_raw(&burst).await;
            controller.expect_ack().await;
            controller.expect_ack().await;
        }
    );

    assert_eq!(callback.unwrap().function(), FunctionType::SendData);
}

#[tokio::test]
async fn rejected_request_skips_callback() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let (result, ()) = tokio::join!(
        driver.send_await_callback(send_data_request(), &cancel),
        async {
            controller.expect_data().await;
            controller.ack().await;
            controller
                .send_data(DataFrame::response(FunctionType::SendData, vec![0x00]))
                .await;
            controller.expect_ack().await;
        }
    );

    assert!(matches!(
        result,
        Err(DriverError::Rejected {
            function: FunctionType::SendData
        })
    ));
    assert_eq!(driver.pending_callbacks(), 0);
}

#[tokio::test]
async fn callback_only_request() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let request = CallbackRequest::new(FunctionType::SetDefault, Bytes::new());
    let (callback, ()) = tokio::join!(driver.send_await_callback(request, &cancel), async {
        let request = controller.expect_data().await;
        let session = session_of(&request);
        controller.ack().await;
        controller
            .send_data(DataFrame::request(FunctionType::SetDefault, vec![session]))
            .await;
        controller.expect_ack().await;
    });

    assert_eq!(callback.unwrap().function(), FunctionType::SetDefault);
}

#[tokio::test]
async fn concurrent_callbacks_get_distinct_sessions() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    const CALLERS: usize = 5;
    let calls = (0..CALLERS).map(|_| {
        let request = CallbackRequest::new(FunctionType::AddNodeToNetwork, vec![0x01]);
        driver.send_await_callback(request, &cancel)
    });

    let (results, sessions) = tokio::join!(futures_util::future::join_all(calls), async {
        let mut sessions = Vec::new();
        for _ in 0..CALLERS {
            let request = controller.expect_data().await;
            sessions.push(session_of(&request));
            controller.ack().await;
        }
        for session in sessions.iter().rev() {
            controller
                .send_data(DataFrame::request(
                    FunctionType::AddNodeToNetwork,
                    vec![*session, 0x01, 0x00, 0x00],
                ))
                .await;
            controller.expect_ack().await;
        }
        sessions
    });

    let sent: HashSet<u8> = sessions.iter().copied().collect();
    assert_eq!(sent.len(), CALLERS);
    assert!(!sent.contains(&0));

    let completed: HashSet<u8> = results
        .into_iter()
        .map(|result| result.unwrap().parameters()[0])
        .collect();
    assert_eq!(completed, sent);
}

#[tokio::test]
async fn cancelled_exchange_frees_response_slot() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let request = DataFrame::request(FunctionType::GetVersion, Bytes::new());
    let (result, ()) = tokio::join!(driver.send_await_response(request, &cancel), async {
        controller.expect_data().await;
        controller.ack().await;
        cancel.cancel();
    });
    assert!(matches!(result, Err(DriverError::Cancelled)));

    // The late response belongs to nobody.
    controller
        .send_data(DataFrame::response(FunctionType::GetVersion, vec![0x01]))
        .await;
    controller.expect_ack().await;

    let fresh = CancellationToken::new();
    let request = DataFrame::request(FunctionType::MemoryGetId, Bytes::new());
    let (response, ()) = tokio::join!(driver.send_await_response(request, &fresh), async {
        controller.expect_data().await;
        controller.ack().await;
        controller
            .send_data(DataFrame::response(
                FunctionType::MemoryGetId,
                vec![0xC0, 0xFF, 0xEE, 0x00, 0x01],
            ))
            .await;
        controller.expect_ack().await;
    });
    assert_eq!(response.unwrap().function(), FunctionType::MemoryGetId);
}

#[tokio::test]
async fn cancelled_callback_wait_removes_entry() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let request = CallbackRequest::new(FunctionType::AddNodeToNetwork, vec![0x01]);
    let (result, ()) = tokio::join!(driver.send_await_callback(request, &cancel), async {
        controller.expect_data().await;
        controller.ack().await;
        cancel.cancel();
    });

    assert!(matches!(result, Err(DriverError::Cancelled)));
    assert_eq!(driver.pending_callbacks(), 0);
}

#[tokio::test]
async fn device_notifications_reach_subscribers_and_handlers() {
    let (driver, mut controller, _peers) = start().await;
    let mut subscription = driver.subscribe_device(7);
    let by_function = Arc::new(AtomicUsize::new(0));
    {
        let by_function = Arc::clone(&by_function);
        driver.on_function(FunctionType::ApplicationCommandHandler, move |_frame| {
            by_function.fetch_add(1, Ordering::SeqCst);
        });
    }

    let notification = DataFrame::request(
        FunctionType::ApplicationCommandHandler,
        vec![0x00, 0x07, 0x03, 0x20, 0x03, 0xFF],
    );
    controller.send_data(notification.clone()).await;
    controller.expect_ack().await;

    let received = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .unwrap();
    assert_eq!(received, Some(notification));
    assert_eq!(by_function.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unhandled_frames_are_dropped_until_a_handler_exists() {
    let (driver, mut controller, _peers) = start().await;

    let mut marker = driver.subscribe_device(9);
    let unknown = DataFrame::request(FunctionType::Unknown(0x77), vec![0x01, 0x02]);
    controller.send_data(unknown.clone()).await;
    controller.expect_ack().await;
    // Frames are dispatched in arrival order; once the marker is seen the
    // unknown frame has been dropped.
    controller
        .send_data(DataFrame::request(
            FunctionType::ApplicationCommandHandler,
            vec![0x00, 0x09, 0x01, 0x20],
        ))
        .await;
    controller.expect_ack().await;
    assert!(marker.recv().await.is_some());

    let mut subscription = driver.subscribe_function(FunctionType::Unknown(0x77));
    assert_eq!(subscription.try_recv(), None);

    controller.send_data(unknown.clone()).await;
    controller.expect_ack().await;
    assert_eq!(subscription.recv().await, Some(unknown));
}

#[tokio::test]
async fn catch_all_subscription_sees_every_unsolicited_frame() {
    let (driver, mut controller, _peers) = start().await;
    let mut everything = driver.subscribe_unsolicited();

    let update = DataFrame::request(FunctionType::ApplicationUpdate, vec![0x84, 0x05, 0x00]);
    let unknown = DataFrame::request(FunctionType::Unknown(0x5E), vec![0x01]);
    for frame in [&update, &unknown] {
        controller.send_data(frame.clone()).await;
        controller.expect_ack().await;
    }

    assert_eq!(everything.recv().await, Some(update));
    assert_eq!(everything.recv().await, Some(unknown));
}

#[tokio::test]
async fn soft_reset_waits_for_startup_notification() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();
    let restarts = Arc::new(AtomicUsize::new(0));
    {
        let restarts = Arc::clone(&restarts);
        driver.on_startup(move |_frame| {
            restarts.fetch_add(1, Ordering::SeqCst);
        });
    }

    let (outcome, ()) = tokio::join!(driver.soft_reset(&cancel), async {
        let request = controller.expect_data().await;
        assert_eq!(request.function(), FunctionType::SerialApiSoftReset);
        controller.ack().await;
        // wake-up reason, watchdog, device option, generic/specific type, no classes
        controller
            .send_data(DataFrame::request(
                FunctionType::SerialApiStarted,
                vec![0x00, 0x00, 0x01, 0x02, 0x01, 0x00],
            ))
            .await;
        controller.expect_ack().await;
    });

    assert_eq!(outcome.unwrap(), ResetOutcome::Restarted);
    assert_eq!(restarts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn soft_reset_without_notification_is_assumed_done() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let (outcome, ()) = tokio::join!(driver.soft_reset(&cancel), async {
        controller.expect_data().await;
        controller.ack().await;
    });

    assert_eq!(outcome.unwrap(), ResetOutcome::Assumed);
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_send_fails() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();

    let request = DataFrame::request(FunctionType::GetVersion, Bytes::new());
    let (result, ()) = tokio::join!(driver.send(request, &cancel), async {
        for _ in 0..4 {
            controller.expect_data().await;
        }
    });

    assert!(matches!(result, Err(DriverError::SendFailed { attempts: 4 })));
    assert_eq!(driver.stats().send_failures, 1);
}

#[tokio::test]
async fn shutdown_fails_outstanding_work() {
    let (driver, mut controller, _peers) = start().await;
    let cancel = CancellationToken::new();
    let mut subscription = driver.subscribe_device(4);

    let request = CallbackRequest::new(FunctionType::AddNodeToNetwork, vec![0x01]);
    let (result, ()) = tokio::join!(driver.send_await_callback(request, &cancel), async {
        controller.expect_data().await;
        controller.ack().await;
        driver.shutdown().await;
    });

    assert!(matches!(result, Err(DriverError::Shutdown)));
    assert_eq!(subscription.recv().await, None);
    assert!(matches!(
        driver
            .send(DataFrame::request(FunctionType::GetVersion, Bytes::new()), &cancel)
            .await,
        Err(DriverError::Shutdown)
    ));
}
