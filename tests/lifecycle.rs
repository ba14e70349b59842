//! End-to-end drain behaviour against a real listener.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http_harness::lifecycle::{LifecycleError, LifecycleState, RegisterFn};
use tokio::sync::Notify;

mod common;

#[tokio::test]
async fn test_graceful_drain_completes_in_flight() {
    let started = Arc::new(Notify::new());
    let routes = common::routes_notifying(Duration::from_millis(500), started.clone());
    let mut app = common::spawn_app(common::config(Duration::from_secs(2)), |b| {
        b.routes(RegisterFn(routes))
    })
    .await;

    let client = reqwest::Client::new();
    let url = app.url("/slow");
    let in_flight = tokio::spawn(async move { client.get(url).send().await?.text().await });
    common::handler_started(&started).await;

    let signalled = Instant::now();
    assert!(app.shutdown.trigger("SIGTERM"));
    app.wait_for(LifecycleState::Draining).await;

    assert_eq!(in_flight.await.unwrap().unwrap(), "done");
    // Stopped accepting as soon as the drain began.
    assert!(tokio::net::TcpStream::connect(app.addr).await.is_err());

    app.run.await.unwrap().unwrap();
    assert_eq!(*app.state.borrow(), LifecycleState::Stopped);
    assert!(signalled.elapsed() >= Duration::from_secs(2));

    let timeout = app.logs.with_message("timeout");
    assert_eq!(timeout.len(), 1);
    assert_eq!(timeout[0]["fields"]["timeout_of_context"], "2s");
}

#[tokio::test]
async fn test_drain_deadline_forces_shutdown() {
    let started = Arc::new(Notify::new());
    let routes = common::routes_notifying(Duration::from_secs(5), started.clone());
    let app = common::spawn_app(common::config(Duration::from_millis(300)), |b| {
        b.routes(RegisterFn(routes))
    })
    .await;

    let client = reqwest::Client::new();
    let url = app.url("/slow");
    let in_flight = tokio::spawn(async move { client.get(url).send().await?.text().await });
    common::handler_started(&started).await;

    let signalled = Instant::now();
    app.shutdown.trigger("SIGINT");

    let result = app.run.await.unwrap();
    assert!(matches!(result, Err(LifecycleError::ForcedShutdown(_))));
    // Closed at the deadline, not when the handler would have finished.
    assert!(signalled.elapsed() < Duration::from_secs(3));
    assert_eq!(*app.state.borrow(), LifecycleState::Stopped);
    assert!(in_flight.await.unwrap().is_err());

    let forced = app.logs.with_message("server forced to shutdown");
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0]["level"], "ERROR");
}

#[tokio::test]
async fn test_second_wait_on_signal_is_rejected() {
    let app = common::spawn_app(common::config(Duration::from_millis(50)), |b| b).await;

    // Another consumer already holds the notification.
    assert!(matches!(
        app.shutdown.wait().await,
        Err(LifecycleError::SignalConsumed)
    ));

    app.shutdown.trigger("SIGQUIT");
    app.run.await.unwrap().unwrap();
}
