//! Drives the rebalancing controller through a realistic workload sequence
//! and checks that mode selection, the lazy-before-incremental gate, and the
//! background worker all behave as the safety constraints require.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdf5_engine::rebalance::{
    IncrementalWorker, Mode, OpKind, RebalanceConfig, RebalanceController, WorkloadConfig,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn mixed_read_write_delete_workload_escalates_through_lazy_before_incremental() {
    init();
    let mut controller = RebalanceController::new(RebalanceConfig::default(), WorkloadConfig::default());
    let start = Instant::now();
    let large_file = 600 * 1024 * 1024;

    // 1000 ops, 50% write / 40% read / 10% delete, spread out so the sample
    // isn't flagged as a single burst.
    for i in 0..1000u64 {
        let at = start + Duration::from_millis(i);
        let kind = match i % 10 {
            0 => OpKind::Delete,
            1..=4 => OpKind::Read,
            _ => OpKind::Write,
        };
        controller.record_operation(kind, large_file, at);
    }

    let first = controller.evaluate(start + Duration::from_secs(1));
    // Incremental requires lazy to have been reached first; on the very
    // first evaluation it hasn't been, so the controller must not jump
    // straight to Incremental.
    assert_ne!(first.mode, Mode::Incremental);

    // After the stability period has elapsed and lazy has been observed,
    // a second evaluation may escalate to Incremental.
    for i in 1000..2000u64 {
        let at = start + Duration::from_secs(40) + Duration::from_millis(i);
        let kind = match i % 10 {
            0 => OpKind::Delete,
            1..=4 => OpKind::Read,
            _ => OpKind::Write,
        };
        controller.record_operation(kind, large_file, at);
    }
    let second = controller.evaluate(start + Duration::from_secs(41));
    assert!(matches!(second.mode, Mode::Lazy | Mode::Incremental));

    let snapshot = controller.metrics().snapshot();
    assert_eq!(snapshot.total_evaluations, 2);
    assert_eq!(snapshot.total_errors(), snapshot.transition_errors + snapshot.detector_errors + snapshot.selector_errors);
}

#[test]
fn append_only_workload_never_leaves_none() {
    init();
    let mut controller = RebalanceController::new(RebalanceConfig::default(), WorkloadConfig::default());
    let start = Instant::now();
    for i in 0..500u64 {
        controller.record_operation(OpKind::Write, 10 * 1024 * 1024, start + Duration::from_millis(i * 10));
    }
    let decision = controller.evaluate(start + Duration::from_secs(10));
    assert_eq!(decision.mode, Mode::None);
}

#[test]
fn stability_period_prevents_rapid_mode_flapping() {
    init();
    let config = RebalanceConfig::default();
    let mut controller = RebalanceController::new(config, WorkloadConfig::default());
    let start = Instant::now();

    for i in 0..200u64 {
        controller.record_operation(OpKind::Delete, 1024, start + Duration::from_millis(i));
    }
    let first = controller.evaluate(start);
    let immediately_after = controller.evaluate(start + Duration::from_millis(500));
    assert_eq!(first.mode, immediately_after.mode);
}

#[test]
fn incremental_worker_drains_on_its_own_schedule_and_shuts_down_cleanly() {
    let drains = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drains);
    let worker = IncrementalWorker::spawn(Duration::from_millis(5), Duration::from_millis(1), move |_budget| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(50));
    worker.shutdown();

    assert!(drains.load(Ordering::SeqCst) > 0);
}
