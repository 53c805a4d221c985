//! Full process run against seeded manifests.

#![allow(clippy::unwrap_used)]

use std::io::Write;
use std::time::Duration;

use globalobject_controller::app;
use gobj_core::stop_channel;
use gobj_reconciler::ControllerConfig;

const MANIFESTS: &str = r"
kind: GlobalObject
metadata:
  name: obj-1
spec:
  id: o8000000000000001
  members: [o0001]
---
kind: LocalObject
metadata:
  name: obj-1-o0001
  ownerReferences:
    - kind: GlobalObject
      name: obj-1
spec:
  id: o0001
status:
  healthy: true
";

fn ephemeral_config() -> ControllerConfig {
    ControllerConfig::default().with_health_addr("127.0.0.1:0".parse().unwrap())
}

/// Given seeded manifests and an ephemeral health port
/// When the controller runs and is then stopped
/// Then it shuts down cleanly
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_until_stopped() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(MANIFESTS.as_bytes()).unwrap();

    let config = ephemeral_config();
    let (stopper, shutdown) = stop_channel();
    let running = tokio::spawn(app::run(config, Some(file.path().to_path_buf()), shutdown));

    tokio::time::sleep(Duration::from_millis(200)).await;
    stopper.stop();

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_run_fails_on_bad_manifests() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(b"kind: Pod\nmetadata:\n  name: p\n").unwrap();

    let (_stopper, shutdown) = stop_channel();
    let manifests = Some(file.path().to_path_buf());
    let result = app::run(ephemeral_config(), manifests, shutdown).await;
    assert!(result.is_err());
}

/// Given the health port is already taken by another listener
/// When the controller starts
/// Then startup fails with the bind error instead of running without health checks
#[tokio::test]
async fn test_run_fails_when_health_port_is_taken() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let (_stopper, shutdown) = stop_channel();
    let config = ControllerConfig::default().with_health_addr(addr);
    let result = tokio::time::timeout(Duration::from_secs(5), app::run(config, None, shutdown))
        .await
        .unwrap();

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("failed to bind health server"));
    drop(occupied);
}
