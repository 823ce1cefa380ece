//! Integration tests for the poll loop against a scripted counter.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use sr620_logger::acquisition::{Acquisition, MAX_CONSECUTIVE_READ_FAILURES};
use sr620_logger::clock::ManualClock;
use sr620_logger::config::StorageConfig;
use sr620_logger::data::DualWriter;
use sr620_logger::instrument::mock::MockCounter;
use sr620_logger::instrument::CounterDriver;
use sr620_logger::state::{FlagSet, StateFlags};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Rig {
    _root: TempDir,
    primary: PathBuf,
    clock: ManualClock,
}

impl Rig {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let primary = root.path().join("data");
        fs::create_dir(&primary).unwrap();
        Self {
            _root: root,
            primary,
            clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()),
        }
    }

    fn acquisition(&self, counter: &MockCounter) -> Acquisition<MockCounter> {
        let storage = StorageConfig {
            primary_data_path: self.primary.clone(),
            secondary_data_path: None,
            prefix: "sr620-".to_string(),
            max_history: 999,
            max_sync: 32,
        };
        let writer =
            DualWriter::open(storage, StateFlags::new(), Arc::new(self.clock.clone())).unwrap();
        Acquisition::new(counter.clone(), writer, "*WAI;XAVG?", Duration::from_millis(5))
    }
}

fn logged_values(acq: &Acquisition<MockCounter>) -> Vec<String> {
    let path = acq.writer().primary_path().unwrap();
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.split('\t').nth(1).unwrap().to_string())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readings_are_logged_in_order() {
    let rig = Rig::new();
    let counter = MockCounter::new();
    let mut acq = rig.acquisition(&counter);

    acq.poll_once().await.unwrap();
    for value in ["1.0e-9", "2.0e-9", "3.0e-9"] {
        counter.push_response(value);
        acq.poll_once().await.unwrap();
    }

    assert_eq!(logged_values(&acq), ["1.0e-9", "2.0e-9", "3.0e-9"]);
    assert_eq!(
        counter.commands(),
        ["*WAI;XAVG?", "*WAI;XAVG?", "*WAI;XAVG?"]
    );
    acq.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_read_failures_reconnect_the_counter() {
    let rig = Rig::new();
    let counter = MockCounter::new();
    let mut acq = rig.acquisition(&counter);
    acq.poll_once().await.unwrap();
    assert!(acq.flags().contains(FlagSet::DEVICE_CONNECTED));

    for _ in 0..MAX_CONSECUTIVE_READ_FAILURES {
        counter.push_failure("timeout");
    }
    for _ in 1..MAX_CONSECUTIVE_READ_FAILURES {
        acq.poll_once().await.unwrap();
        assert!(acq.flags().contains(FlagSet::DEVICE_CONNECTED));
    }
    acq.poll_once().await.unwrap();
    assert!(!acq.flags().contains(FlagSet::DEVICE_CONNECTED));
    assert!(!acq.driver().is_open());
    assert_eq!(counter.close_count(), 1);

    // Failed reads leave no records behind
    assert!(logged_values(&acq).is_empty());

    acq.poll_once().await.unwrap();
    assert!(acq.flags().contains(FlagSet::DEVICE_CONNECTED));
    assert_eq!(counter.open_count(), 2);
    assert_eq!(acq.read_failures(), 0);

    counter.push_response("4.2e-9");
    acq.poll_once().await.unwrap();
    assert_eq!(logged_values(&acq), ["4.2e-9"]);
    acq.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_signal_stops_the_loop() {
    let rig = Rig::new();
    let counter = MockCounter::new()
        .with_delay(Duration::from_millis(5))
        .with_fallback("1.23e-9");
    let mut acq = rig.acquisition(&counter);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.send(true).unwrap();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), acq.run(shutdown)).await;
    assert!(matches!(outcome, Ok(Ok(()))));
    assert!(!logged_values(&acq).is_empty());

    acq.shutdown().await.unwrap();
    assert!(!acq.driver().is_open());
    assert!(acq.writer().primary_path().is_none());
    assert!(!acq.flags().contains(FlagSet::DEVICE_CONNECTED));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn losing_primary_storage_ends_the_loop() {
    let rig = Rig::new();
    let counter = MockCounter::new().with_fallback("1.23e-9");
    let mut acq = rig.acquisition(&counter);
    acq.poll_once().await.unwrap();
    acq.writer().wait_for_workers().await.unwrap();

    fs::remove_dir_all(&rig.primary).unwrap();
    rig.clock.advance(ChronoDuration::days(1));

    let (_stop, shutdown) = watch::channel(false);
    let outcome = tokio::time::timeout(Duration::from_secs(5), acq.run(shutdown))
        .await
        .unwrap();
    let err = outcome.unwrap_err();
    assert!(err.is_fatal());

    acq.shutdown().await.unwrap();
}
