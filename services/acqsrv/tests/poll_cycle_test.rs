//! Periodic cycle behaviour against the simulated bus

mod common;

use std::time::{Duration, Instant};

use acqsrv::config::FaultPolicyKind;
use acqsrv::core::decoder::{self, Encoding, WordOrder};
use acqsrv::core::poller::DevicePhase;
use acqsrv::storage::AcquisitionStore;
use acqsrv::test_utils::TransactionKind;
use acqsrv::FaultKind;
use common::*;

async fn stored(h: &Harness, name: &str) -> Option<f64> {
    h.store
        .load_parameters()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.param_name == name)
        .map(|p| p.value)
}

#[tokio::test]
async fn healthy_cycle_persists_decoded_values() {
    let bus = plant_bus();
    bus.set_holding(TRM200, 4105, &[0x41CC, 0x0000]);
    let h = harness(bus).await;

    let report = h.service.coordinator.run_cycle().await;

    assert!(report.devices.iter().all(|d| d.success));
    assert_eq!(report.persisted, 6);
    assert_eq!(stored(&h, "T1").await, Some(25.5));
    assert_eq!(stored(&h, "T").await, Some(25.0));
    assert_eq!(stored(&h, "DP").await, Some(1500.0));

    let rows = h.store.load_parameters().await.unwrap();
    let t = rows.iter().find(|p| p.param_name == "T").unwrap();
    assert_eq!(t.type_tag, 2);
    assert_eq!(t.unit_id, "1");

    let availability = h.store.load_availability().await.unwrap();
    assert_eq!(availability["1"], true);
    assert_eq!(availability["2"], true);
    // A device without polled parameters succeeds on connect
    assert_eq!(availability["3"], true);
}

#[tokio::test]
async fn stored_value_matches_decoder_output() {
    let bus = plant_bus();
    bus.set_holding(TRM210, 4107, &[0x4049, 0x0FDB]);
    let h = harness(bus.clone()).await;

    h.service.coordinator.run_cycle().await;

    let expected = decoder::decode(
        &[0x4049, 0x0FDB],
        &Encoding::Float32 {
            word_order: WordOrder::HighFirst,
        },
    )
    .unwrap();
    assert_eq!(stored(&h, "Tn").await, Some(expected));
}

#[tokio::test]
async fn failed_parameter_keeps_previous_value() {
    let bus = plant_bus();
    let h = harness(bus.clone()).await;

    h.service.coordinator.run_cycle().await;
    assert_eq!(stored(&h, "T2").await, Some(22.25));

    bus.set_float32(TRM200, 4105, 30.0);
    bus.set_float32(TRM200, 4107, 99.0);
    bus.fail_read(TRM200, 4107);
    let report = h.service.coordinator.run_cycle().await;

    let trm200 = report.device("trm200").unwrap();
    assert!(trm200.success);
    let t2 = trm200.outcomes.iter().find(|o| o.parameter == "T2").unwrap();
    assert_eq!(t2.fault, Some(FaultKind::Protocol));

    assert_eq!(stored(&h, "T1").await, Some(30.0));
    assert_eq!(stored(&h, "T2").await, Some(22.25));
}

#[tokio::test]
async fn decode_fault_is_tagged_and_not_persisted() {
    let bus = plant_bus();
    // NaN bit pattern
    bus.set_holding(TRM210, 4105, &[0x7FC0, 0x0000]);
    let h = harness(bus).await;

    let report = h.service.coordinator.run_cycle().await;

    let trm210 = report.device("trm210").unwrap();
    let dpy = trm210.outcomes.iter().find(|o| o.parameter == "DPy").unwrap();
    assert_eq!(dpy.fault, Some(FaultKind::Decode));
    assert!(trm210.success);
    assert_eq!(stored(&h, "DPy").await, None);
    assert_eq!(stored(&h, "Tn").await, Some(40.0));
}

#[tokio::test]
async fn slow_device_does_not_stall_the_others() {
    let bus = plant_bus();
    bus.set_connect_delay(TRM200, Duration::from_secs(2));
    let h = harness(bus.clone()).await;

    let started = Instant::now();
    let report = h.service.coordinator.run_cycle().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let trm200 = report.device("trm200").unwrap();
    assert!(!trm200.success);
    assert_eq!(trm200.fault, Some(FaultKind::Timeout));
    assert_eq!(trm200.phase, DevicePhase::Connecting);
    // No parameter of the unreachable device was attempted
    assert!(bus.transactions_for(TRM200).is_empty());

    assert!(report.device("trm210").unwrap().success);
    assert!(report.device("trm202").unwrap().success);
    assert_eq!(report.availability["2"], true);
}

#[tokio::test]
async fn sequential_mode_bounds_each_device_by_its_timeout() {
    let bus = plant_bus();
    bus.set_connect_delay(TRM202, Duration::from_secs(2));
    let mut config = config_with("");
    config.polling.concurrent_devices = false;
    let h = harness_with_config(bus, &config).await;

    let started = Instant::now();
    let report = h.service.coordinator.run_cycle().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!report.device("trm202").unwrap().success);
    assert!(report.device("pressure_sensor").unwrap().success);
    assert_eq!(report.availability["1"], true);
}

#[tokio::test]
async fn unit_goes_unavailable_when_every_device_fails() {
    let bus = plant_bus();
    let h = harness(bus.clone()).await;
    h.service.coordinator.run_cycle().await;
    assert_eq!(h.store.load_availability().await.unwrap()["2"], true);

    bus.refuse_connections(TRM200, true);
    bus.refuse_connections(TRM210, true);
    bus.refuse_connections(PRESSURE, true);
    let report = h.service.coordinator.run_cycle().await;

    assert_eq!(
        report.device("trm200").unwrap().fault,
        Some(FaultKind::Connection)
    );
    let availability = h.store.load_availability().await.unwrap();
    assert_eq!(availability["2"], false);
    // pressure_sensor failed but trm202 did not
    assert_eq!(availability["1"], true);
}

#[tokio::test]
async fn read_timeout_reopens_session_for_next_parameter() {
    let bus = plant_bus();
    bus.hang_read(TRM200, 4105, Duration::from_millis(500));
    let h = harness(bus.clone()).await;

    let report = h.service.coordinator.run_cycle().await;

    let trm200 = report.device("trm200").unwrap();
    let t1 = trm200.outcomes.iter().find(|o| o.parameter == "T1").unwrap();
    assert_eq!(t1.fault, Some(FaultKind::Timeout));
    let t2 = trm200.outcomes.iter().find(|o| o.parameter == "T2").unwrap();
    assert_eq!(t2.value, Some(22.25));
    assert!(trm200.success);
    assert_eq!(bus.connect_count(TRM200), 2);
}

#[tokio::test]
async fn protocol_fault_keeps_session() {
    let bus = plant_bus();
    bus.fail_read(TRM210, 4105);
    let h = harness(bus.clone()).await;

    h.service.coordinator.run_cycle().await;

    assert_eq!(bus.connect_count(TRM210), 1);
    let reads: Vec<_> = bus
        .transactions_for(TRM210)
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Read)
        .collect();
    assert_eq!(reads.len(), 2);
}

#[tokio::test]
async fn fail_fast_gives_up_after_one_attempt() {
    let bus = plant_bus();
    bus.refuse_next_connections(TRM202, 1);
    let h = harness(bus).await;

    let report = h.service.coordinator.run_cycle().await;
    let trm202 = report.device("trm202").unwrap();
    assert!(!trm202.success);
    assert_eq!(trm202.attempts, 1);
}

#[tokio::test]
async fn bounded_retry_recovers_device() {
    let bus = plant_bus();
    bus.refuse_next_connections(TRM202, 2);
    let mut config = config_with("");
    config.polling.fault_policy = FaultPolicyKind::BoundedRetry;
    config.polling.max_retries = 2;
    config.polling.retry_delay_seconds = 0;
    let h = harness_with_config(bus, &config).await;

    let report = h.service.coordinator.run_cycle().await;
    let trm202 = report.device("trm202").unwrap();
    assert!(trm202.success);
    assert_eq!(trm202.attempts, 3);
    assert_eq!(stored(&h, "T").await, Some(25.0));
}

#[tokio::test]
async fn bounded_retry_stops_at_limit() {
    let bus = plant_bus();
    bus.refuse_connections(TRM202, true);
    let mut config = config_with("");
    config.polling.fault_policy = FaultPolicyKind::BoundedRetry;
    config.polling.max_retries = 1;
    config.polling.retry_delay_seconds = 0;
    let h = harness_with_config(bus, &config).await;

    let report = h.service.coordinator.run_cycle().await;
    let trm202 = report.device("trm202").unwrap();
    assert!(!trm202.success);
    assert_eq!(trm202.attempts, 2);
}

#[tokio::test]
async fn polling_task_stops_on_cancel() {
    let h = harness(plant_bus()).await;
    let token = tokio_util::sync::CancellationToken::new();

    let task = h.service.start_polling(token.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    let last = h.service.last_cycle.read().clone().unwrap();
    assert_eq!(last.devices.len(), 5);
}
