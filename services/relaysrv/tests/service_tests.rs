//! Service bootstrap tests with in-memory backends

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use fleet_model::CommandStatus;
use relaysrv::{RelayService, ServiceConfig};

mod support;
use support::{at, daily, relay, wait_until, Harness};

fn test_config() -> ServiceConfig {
    let mut router = relay("router", 17);
    router.boot_power = true;
    router.monitor = true;

    let mut camera = relay("camera", 27);
    camera.schedule = Some(daily("08:00", "18:00"));

    let aux = relay("aux", 22);

    let mut config = ServiceConfig {
        relays: vec![router, camera, aux],
        ..Default::default()
    };
    config.collectors.network.enabled = false;
    config.service.command_poll_secs = 1;
    config
}

#[tokio::test]
async fn test_start_spawns_tasks_and_shuts_down() {
    let h = Harness::new();
    h.clock.set(at(9, 0));
    let config = test_config();
    config.validate().unwrap();

    let service = RelayService::start(&config, h.backends()).await.unwrap();

    let mut names = service.task_names();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "commands",
            "monitor:camera",
            "monitor:router",
            "processor:general",
            "processor:router",
        ]
    );

    // Boot state, then the camera schedule and router sampling kick in
    assert!(service.manager().read_state("router").await);
    assert!(wait_until(Duration::from_secs(5), || h.actuator.level(27) == Some(true)).await);
    assert!(wait_until(Duration::from_secs(5), || !h.log.is_empty("router")).await);
    assert_eq!(h.actuator.level(22), Some(false));

    h.jobs.push(r#"{"job_id":"j-1","operation":"relay_on","relay_id":"aux"}"#);
    assert!(wait_until(Duration::from_secs(5), || h.gateway.reports().len() == 1).await);
    assert_eq!(h.gateway.reports()[0].status, CommandStatus::Succeeded);
    assert_eq!(h.actuator.level(22), Some(true));

    tokio::time::timeout(Duration::from_secs(5), service.shutdown())
        .await
        .unwrap();

    // Relays keep their last state
    assert_eq!(h.actuator.level(17), Some(true));
    assert_eq!(h.actuator.level(22), Some(true));
}

#[tokio::test]
async fn test_actuator_failure_prevents_start() {
    let h = Harness::new();
    h.actuator.set_failing(Some("gpio chip missing"));

    let err = RelayService::start(&test_config(), h.backends())
        .await
        .err()
        .unwrap();
    assert!(format!("{:#}", err).contains("gpio chip missing"));
}

#[tokio::test]
async fn test_duplicate_pin_prevents_start() {
    let h = Harness::new();
    let mut config = test_config();
    config.relays.push(relay("fan", 17));

    assert!(RelayService::start(&config, h.backends()).await.is_err());
    assert_eq!(h.actuator.write_count(17), 0);
}
