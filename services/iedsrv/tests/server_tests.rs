//! Server lifecycle, TCP sessions and application updates

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use errors::IedError;
use iec61850_model::{FunctionalConstraint, IedModel, NodeSpec, Value};
use iedsrv::{battery, IedConnection, IedServer};
use tokio_util::sync::CancellationToken;

use common::{battery_server, battery_server_with, test_config, wait_until};

#[tokio::test]
async fn test_tcp_read() {
    let server = battery_server();
    let addr = server.start(0).await.unwrap();
    assert!(server.is_running());
    assert_eq!(server.local_addr(), Some(addr));

    let mut client = IedConnection::connect("127.0.0.1", addr.port())
        .await
        .unwrap();
    let value = client
        .read(battery::VOLTAGE_VALUE, FunctionalConstraint::Measurand)
        .await
        .unwrap();
    assert_eq!(value, Value::Float32(0.0));
    assert_eq!(server.session_count(), 1);
    assert_eq!(server.sessions()[0].id, 1);

    client.close().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.session_count() == 0).await);
    server.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let server = battery_server();
    server.start(0).await.unwrap();

    server.stop().await;
    assert!(!server.is_running());
    assert_eq!(server.local_addr(), None);
    server.stop().await;

    // Stopping a server that never started is fine too
    battery_server().stop().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let server = battery_server();
    server.start(0).await.unwrap();
    server.stop().await;

    let addr = server.start(0).await.unwrap();
    let mut client = IedConnection::connect("127.0.0.1", addr.port())
        .await
        .unwrap();
    assert!(client
        .read(battery::VENDOR, FunctionalConstraint::Description)
        .await
        .is_ok());
    server.stop().await;
}

#[tokio::test]
async fn test_start_twice() {
    let server = battery_server();
    server.start(0).await.unwrap();
    let err = server.start(0).await.unwrap_err();
    assert!(matches!(err, IedError::AlreadyRunning));
    server.stop().await;
}

#[tokio::test]
async fn test_port_in_use() {
    let first = battery_server();
    let addr = first.start(0).await.unwrap();

    let second = battery_server();
    let err = second.start(addr.port()).await.unwrap_err();
    assert!(matches!(err, IedError::Bind { .. }), "{err:?}");
    assert!(!second.is_running());
    first.stop().await;
}

#[tokio::test]
async fn test_max_sessions_refuses_connection() {
    let server = battery_server_with(test_config().max_sessions(1));
    let addr = server.start(0).await.unwrap();

    let mut first = IedConnection::connect("127.0.0.1", addr.port())
        .await
        .unwrap();
    first
        .read(battery::VENDOR, FunctionalConstraint::Description)
        .await
        .unwrap();

    let mut second = IedConnection::connect_with_timeout(
        "127.0.0.1",
        addr.port(),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    let err = second
        .read(battery::VENDOR, FunctionalConstraint::Description)
        .await
        .unwrap_err();
    assert!(matches!(err, IedError::ConnectionClosing), "{err:?}");
    assert_eq!(server.session_count(), 1);

    // Local sessions count against the same limit
    assert!(matches!(
        server.connect_local(),
        Err(IedError::ConnectionFailed { .. })
    ));
    server.stop().await;
}

#[tokio::test]
async fn test_idle_session_is_closed() {
    let config = test_config().idle_timeout(Some(Duration::from_secs(1)));
    let server = battery_server_with(config);
    let addr = server.start(0).await.unwrap();

    let mut client = IedConnection::connect("127.0.0.1", addr.port())
        .await
        .unwrap();
    client
        .read(battery::VENDOR, FunctionalConstraint::Description)
        .await
        .unwrap();
    assert_eq!(server.session_count(), 1);

    assert!(wait_until(Duration::from_secs(3), || server.session_count() == 0).await);
    let err = client
        .read(battery::VENDOR, FunctionalConstraint::Description)
        .await
        .unwrap_err();
    assert!(matches!(err, IedError::ConnectionClosing), "{err:?}");
    server.stop().await;
}

#[tokio::test]
async fn test_stop_closes_local_sessions() {
    let server = battery_server();
    let mut client = server.connect_local().unwrap();
    assert_eq!(server.session_count(), 1);

    server.stop().await;
    assert!(wait_until(Duration::from_secs(2), || server.session_count() == 0).await);
    let err = client
        .read(battery::VENDOR, FunctionalConstraint::Description)
        .await
        .unwrap_err();
    assert!(matches!(err, IedError::ConnectionClosing), "{err:?}");
    let err = client
        .write(battery::VENDOR, FunctionalConstraint::Description, "late")
        .await
        .unwrap_err();
    assert!(matches!(err, IedError::ConnectionClosing), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batched_update_is_atomic() {
    let server = Arc::new(battery_server());
    let voltage = server.attribute(battery::VOLTAGE_VALUE).unwrap();
    let timestamp = server.attribute(battery::VOLTAGE_TIMESTAMP).unwrap();

    // Tight loop on a plain thread: the only thing keeping value and
    // timestamp in step is the model lock.
    let writer = {
        let server = Arc::clone(&server);
        std::thread::spawn(move || {
            for i in 1..=20_000_i64 {
                let mut model = server.lock_model();
                model.update_value(&voltage, i as f32).unwrap();
                model
                    .update_timestamp(&timestamp, DateTime::from_timestamp(i, 0).unwrap())
                    .unwrap();
            }
        })
    };

    let mut client = server.connect_local().unwrap();
    let mut observed = 0;
    while !writer.is_finished() || observed == 0 {
        let value = client
            .read("Battery/ZBAT.Vol", FunctionalConstraint::Measurand)
            .await
            .unwrap();
        let members = value.as_structured().unwrap();
        let mag = members[0].as_structured().unwrap()[0].as_f32().unwrap();
        let t = members[2].as_timestamp().unwrap();
        if mag == 0.0 {
            // Nothing written yet
            continue;
        }
        assert_eq!(mag as i64, t.timestamp(), "voltage and timestamp out of step");
        observed += 1;
    }
    writer.join().unwrap();
}

#[tokio::test]
async fn test_update_loop_raises_voltage() {
    let server = Arc::new(battery_server());
    let cancel = CancellationToken::new();
    let updater = tokio::spawn(battery::run_update_loop(
        Arc::clone(&server),
        Duration::from_millis(10),
        cancel.clone(),
    ));

    let rising = wait_until(Duration::from_secs(2), || {
        let model = server.lock_model();
        model
            .read(battery::VOLTAGE_VALUE)
            .unwrap()
            .as_f32()
            .is_some_and(|v| v > 0.0)
    })
    .await;
    assert!(rising);

    cancel.cancel();
    updater.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_attribute_handle_requires_basic_attribute() {
    let server = battery_server();
    let handle = server.attribute("testmodelBattery/ZBAT.Vol.mag.f").unwrap();
    assert_eq!(handle.path(), battery::VOLTAGE_VALUE);

    let err = server.attribute("Battery/ZBAT.Vol").unwrap_err();
    assert!(matches!(err, IedError::TypeMismatch { .. }));
}

#[test]
fn test_invalid_model_rejected() {
    let mut model = IedModel::new("broken");
    let device = model.create_device("Battery").unwrap();
    model
        .add_child(device, NodeSpec::logical_node("ZBAT"))
        .unwrap();

    let err = IedServer::new(model, test_config()).err().unwrap();
    assert!(matches!(err, IedError::MissingMandatoryObject { .. }));
}
