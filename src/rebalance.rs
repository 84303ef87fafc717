//! Adaptive B-tree rebalancing controller (spec.md §4.10).
//!
//! Observes a stream of recent operations (the [`WorkloadDetector`]),
//! classifies the resulting workload, and asks a [`Selector`] for a target
//! [`Mode`] under a set of safety constraints. The controller never touches
//! B-tree storage itself — it only decides *when* a caller should run a
//! rebalance pass and, in `incremental` mode, drives a background worker
//! that the caller is expected to wire to its own merge routine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::info;
use parking_lot::RwLock;

/// One observed operation against the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    kind: OpKind,
    at: Instant,
    file_size: u64,
}

/// Rebalancing mode (spec.md §4.10 state machine: `none ⇄ lazy ⇄
/// incremental`, `incremental` requires `lazy` as a prerequisite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    None,
    Lazy,
    Incremental,
}

impl Mode {
    fn rank(self) -> u8 {
        match self {
            Mode::None => 0,
            Mode::Lazy => 1,
            Mode::Incremental => 2,
        }
    }
}

/// Coarse workload classification (spec.md §4.10 "Workload detector").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    BatchDeletion,
    AppendOnly,
    FrequentWrites,
    ReadHeavy,
    MixedRW,
    Unknown,
}

/// Derived statistics over the detector's current window.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadFeatures {
    pub sample_size: usize,
    pub read_ratio: f64,
    pub write_ratio: f64,
    pub delete_ratio: f64,
    pub ops_per_sec: f64,
    pub burst: bool,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkloadConfig {
    /// Ring buffer capacity (spec.md: default 10 000).
    pub capacity: usize,
    /// Sliding time window (spec.md: default 5 min).
    pub window: Duration,
    /// Minimum sample count before a classification other than `Unknown`
    /// is attempted.
    pub min_sample: usize,
    /// An event span under this fraction of the window counts as "burst".
    pub burst_fraction: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            capacity: 10_000,
            window: Duration::from_secs(5 * 60),
            min_sample: 10,
            burst_fraction: 0.2,
        }
    }
}

/// Ring buffer of recent operations tagged with file size, used to derive
/// [`WorkloadFeatures`] and classify the current [`Workload`].
pub struct WorkloadDetector {
    config: WorkloadConfig,
    events: VecDeque<Event>,
}

impl WorkloadDetector {
    pub fn new(config: WorkloadConfig) -> Self {
        WorkloadDetector {
            config,
            events: VecDeque::with_capacity(config.capacity),
        }
    }

    /// Records one operation at `now`, evicting events that fall outside
    /// the sliding window or exceed the ring buffer's capacity.
    pub fn record(&mut self, kind: OpKind, file_size: u64, now: Instant) {
        self.events.push_back(Event { kind, at: now, file_size });
        while self.events.len() > self.config.capacity {
            self.events.pop_front();
        }
        self.evict_expired(now);
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.duration_since(front.at) > self.config.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Computes [`WorkloadFeatures`] over whatever is currently in the
    /// window, as of `now`.
    pub fn features(&mut self, now: Instant) -> WorkloadFeatures {
        self.evict_expired(now);
        let n = self.events.len();
        if n == 0 {
            return WorkloadFeatures::default();
        }

        let mut reads = 0usize;
        let mut writes = 0usize;
        let mut deletes = 0usize;
        for e in &self.events {
            match e.kind {
                OpKind::Read => reads += 1,
                OpKind::Write => writes += 1,
                OpKind::Delete => deletes += 1,
            }
        }

        let oldest = self.events.front().unwrap().at;
        let span = now.duration_since(oldest);
        let ops_per_sec = if span.as_secs_f64() > 0.0 {
            n as f64 / span.as_secs_f64()
        } else {
            n as f64
        };
        let burst = span.as_secs_f64() < self.config.window.as_secs_f64() * self.config.burst_fraction;
        let file_size = self.events.back().unwrap().file_size;

        WorkloadFeatures {
            sample_size: n,
            read_ratio: reads as f64 / n as f64,
            write_ratio: writes as f64 / n as f64,
            delete_ratio: deletes as f64 / n as f64,
            ops_per_sec,
            burst,
            file_size,
        }
    }

    /// Classifies the workload from `features` (spec.md §4.10
    /// "Classification"), rules checked in order.
    pub fn classify(&self, features: &WorkloadFeatures) -> Workload {
        if features.sample_size < self.config.min_sample {
            return Workload::Unknown;
        }
        if features.delete_ratio > 0.6 && features.burst {
            Workload::BatchDeletion
        } else if features.write_ratio > 0.5 && features.delete_ratio < 0.05 {
            Workload::AppendOnly
        } else if features.write_ratio > 0.6 && !features.burst {
            Workload::FrequentWrites
        } else if features.read_ratio > 0.7 {
            Workload::ReadHeavy
        } else if features.delete_ratio < 0.2 {
            Workload::MixedRW
        } else {
            Workload::Unknown
        }
    }
}

/// File size large enough that a heavier rebalancing mode pays off
/// (spec.md §4.10 selector rules).
pub const FILE_SIZE_LARGE_THRESHOLD: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct RebalanceConfig {
    pub underflow_threshold: f64,
    pub batch_size: usize,
    pub budget: Duration,
    pub interval: Duration,
    pub min_confidence: f64,
    pub min_stability_period: Duration,
    pub file_size_large_threshold: u64,
    pub allowed_modes: Option<[bool; 3]>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        RebalanceConfig {
            underflow_threshold: 0.05,
            batch_size: 100,
            budget: Duration::from_millis(100),
            interval: Duration::from_secs(5),
            min_confidence: 0.7,
            min_stability_period: Duration::from_secs(30),
            file_size_large_threshold: FILE_SIZE_LARGE_THRESHOLD,
            allowed_modes: None,
        }
    }
}

impl RebalanceConfig {
    fn allows(&self, mode: Mode) -> bool {
        match &self.allowed_modes {
            None => true,
            Some(flags) => flags[mode.rank() as usize],
        }
    }
}

/// The selector's output: a proposed mode plus the reasoning behind it
/// (spec.md §4.10 "Selector").
#[derive(Debug, Clone)]
pub struct Decision {
    pub mode: Mode,
    pub reason: &'static str,
    pub confidence: f64,
    pub workload: Workload,
    pub features: WorkloadFeatures,
    pub timestamp: Instant,
}

/// Base confidence from the sample-size bucket (spec.md §4.10 "Selector"),
/// before the delete-ratio/burst adjustments.
fn base_confidence(sample_size: usize) -> f64 {
    if sample_size >= 1000 {
        0.9
    } else if sample_size >= 100 {
        0.75
    } else if sample_size >= 50 {
        0.65
    } else if sample_size >= 10 {
        0.5
    } else {
        0.3
    }
}

/// Maps `(features, workload)` to a mode and a confidence score
/// (spec.md §4.10 "Selector"). Does not apply safety constraints; callers
/// use [`RebalanceController::evaluate`] for the gated version.
pub fn select_mode(features: &WorkloadFeatures, workload: Workload, config: &RebalanceConfig) -> (Mode, &'static str, f64) {
    let large_file = features.file_size > config.file_size_large_threshold;
    let (mode, reason) = match workload {
        Workload::BatchDeletion => (Mode::Lazy, "batch deletion detected"),
        Workload::AppendOnly => (Mode::None, "append-only workload"),
        Workload::FrequentWrites if large_file => (Mode::Incremental, "frequent writes on a large file"),
        Workload::FrequentWrites => (Mode::Lazy, "frequent writes"),
        Workload::ReadHeavy => (Mode::Lazy, "read-heavy workload"),
        Workload::MixedRW if large_file => (Mode::Incremental, "mixed read/write on a large file"),
        Workload::MixedRW => (Mode::Lazy, "mixed read/write workload"),
        Workload::Unknown => (Mode::None, "workload could not be classified"),
    };

    let mut confidence: f64 = base_confidence(features.sample_size);
    if features.delete_ratio > 0.6 {
        confidence += 0.1;
    }
    if features.burst {
        confidence += 0.05;
    }
    (mode, reason, confidence.min(1.0))
}

/// Per-category error counters (spec.md §7: "The rebalancing controller
/// records errors in per-category counters").
#[derive(Debug, Default)]
struct ErrorCounters {
    transition_errors: AtomicU64,
    detector_errors: AtomicU64,
    selector_errors: AtomicU64,
}

/// An immutable point-in-time view of [`Metrics`], suitable for logging or
/// JSON export (spec.md §4.10 "Immutable snapshots").
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_evaluations: u64,
    pub mode_changes: u64,
    pub per_mode: HashMap<Mode, u64>,
    pub per_workload: HashMap<Workload, u64>,
    pub per_op_type: HashMap<OpKind, u64>,
    pub transition_errors: u64,
    pub detector_errors: u64,
    pub selector_errors: u64,
    pub min_confidence: f64,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub eval_time_total: Duration,
    pub file_size_under_100mib: u64,
    pub file_size_100_to_500mib: u64,
    pub file_size_over_500mib: u64,
}

impl MetricsSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.transition_errors + self.detector_errors + self.selector_errors
    }

    /// Hand-rolled JSON export (no serde in this crate's dependency stack;
    /// the shape is fixed and small enough to format directly).
    pub fn to_json(&self) -> String {
        format!(
            "{{\"total_evaluations\":{},\"mode_changes\":{},\"total_errors\":{},\
             \"transition_errors\":{},\"detector_errors\":{},\"selector_errors\":{},\
             \"min_confidence\":{:.3},\"avg_confidence\":{:.3},\"max_confidence\":{:.3},\
             \"eval_time_total_ms\":{},\"file_size_histogram\":{{\"under_100mib\":{},\
             \"100_to_500mib\":{},\"over_500mib\":{}}}}}",
            self.total_evaluations,
            self.mode_changes,
            self.total_errors(),
            self.transition_errors,
            self.detector_errors,
            self.selector_errors,
            self.min_confidence,
            self.avg_confidence,
            self.max_confidence,
            self.eval_time_total.as_millis(),
            self.file_size_under_100mib,
            self.file_size_100_to_500mib,
            self.file_size_over_500mib,
        )
    }
}

/// Mutable counters backing [`MetricsSnapshot`]. Scalar counters are
/// lock-free atomics; the per-key maps go behind a `RwLock` (spec.md §5:
/// "Metrics recording is lock-free where possible... uses a read-write
/// lock for map/histogram updates").
#[derive(Default)]
pub struct Metrics {
    total_evaluations: AtomicU64,
    mode_changes: AtomicU64,
    errors: ErrorCounters,
    per_mode: RwLock<HashMap<Mode, u64>>,
    per_workload: RwLock<HashMap<Workload, u64>>,
    per_op_type: RwLock<HashMap<OpKind, u64>>,
    confidence_sum_milli: AtomicU64,
    confidence_count: AtomicU64,
    min_confidence_milli: AtomicU64,
    max_confidence_milli: AtomicU64,
    eval_time_total_nanos: AtomicU64,
    file_size_under_100mib: AtomicU64,
    file_size_100_to_500mib: AtomicU64,
    file_size_over_500mib: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            min_confidence_milli: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    fn record_op(&self, kind: OpKind) {
        *self.per_op_type.write().entry(kind).or_insert(0) += 1;
    }

    fn record_evaluation(&self, decision: &Decision, mode_changed: bool, eval_time: Duration) {
        self.total_evaluations.fetch_add(1, Ordering::Relaxed);
        if mode_changed {
            self.mode_changes.fetch_add(1, Ordering::Relaxed);
        }
        *self.per_mode.write().entry(decision.mode).or_insert(0) += 1;
        *self.per_workload.write().entry(decision.workload).or_insert(0) += 1;

        let milli = (decision.confidence * 1000.0).round() as u64;
        self.confidence_sum_milli.fetch_add(milli, Ordering::Relaxed);
        self.confidence_count.fetch_add(1, Ordering::Relaxed);
        self.min_confidence_milli.fetch_min(milli, Ordering::Relaxed);
        self.max_confidence_milli.fetch_max(milli, Ordering::Relaxed);

        self.eval_time_total_nanos
            .fetch_add(eval_time.as_nanos() as u64, Ordering::Relaxed);

        let size = decision.features.file_size;
        if size < 100 * 1024 * 1024 {
            self.file_size_under_100mib.fetch_add(1, Ordering::Relaxed);
        } else if size <= 500 * 1024 * 1024 {
            self.file_size_100_to_500mib.fetch_add(1, Ordering::Relaxed);
        } else {
            self.file_size_over_500mib.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_transition_error(&self) {
        self.errors.transition_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_detector_error(&self) {
        self.errors.detector_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_selector_error(&self) {
        self.errors.selector_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.confidence_count.load(Ordering::Relaxed);
        let (min_confidence, avg_confidence, max_confidence) = if count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                self.min_confidence_milli.load(Ordering::Relaxed) as f64 / 1000.0,
                self.confidence_sum_milli.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0,
                self.max_confidence_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            )
        };
        MetricsSnapshot {
            total_evaluations: self.total_evaluations.load(Ordering::Relaxed),
            mode_changes: self.mode_changes.load(Ordering::Relaxed),
            per_mode: self.per_mode.read().clone(),
            per_workload: self.per_workload.read().clone(),
            per_op_type: self.per_op_type.read().clone(),
            transition_errors: self.errors.transition_errors.load(Ordering::Relaxed),
            detector_errors: self.errors.detector_errors.load(Ordering::Relaxed),
            selector_errors: self.errors.selector_errors.load(Ordering::Relaxed),
            min_confidence,
            avg_confidence,
            max_confidence,
            eval_time_total: Duration::from_nanos(self.eval_time_total_nanos.load(Ordering::Relaxed)),
            file_size_under_100mib: self.file_size_under_100mib.load(Ordering::Relaxed),
            file_size_100_to_500mib: self.file_size_100_to_500mib.load(Ordering::Relaxed),
            file_size_over_500mib: self.file_size_over_500mib.load(Ordering::Relaxed),
        }
    }
}

/// Tracks the fraction of underflowing B-tree nodes, driving the `lazy`
/// mode's "process when the fraction crosses a threshold" rule.
#[derive(Debug, Default)]
pub struct UnderflowTracker {
    underflowing: usize,
    total: usize,
}

impl UnderflowTracker {
    pub fn new() -> Self {
        UnderflowTracker::default()
    }

    pub fn observe(&mut self, total_nodes: usize, underflowing_nodes: usize) {
        self.total = total_nodes;
        self.underflowing = underflowing_nodes;
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.underflowing as f64 / self.total as f64
        }
    }

    /// Whether `lazy` mode should run a merge batch right now.
    pub fn should_rebalance(&self, config: &RebalanceConfig) -> bool {
        self.fraction() > config.underflow_threshold
    }
}

/// Drives the classify → select → gate pipeline and holds the controller's
/// current mode (spec.md §4.10).
pub struct RebalanceController {
    config: RebalanceConfig,
    detector: WorkloadDetector,
    metrics: Arc<Metrics>,
    mode: Mode,
    lazy_reached: bool,
    last_transition: Option<Instant>,
}

impl RebalanceController {
    pub fn new(config: RebalanceConfig, workload_config: WorkloadConfig) -> Self {
        RebalanceController {
            config,
            detector: WorkloadDetector::new(workload_config),
            metrics: Arc::new(Metrics::new()),
            mode: Mode::None,
            lazy_reached: false,
            last_transition: None,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Feeds one observed operation into the workload detector.
    pub fn record_operation(&mut self, kind: OpKind, file_size: u64, now: Instant) {
        self.detector.record(kind, file_size, now);
        self.metrics.record_op(kind);
    }

    /// Runs one classify → select → gate cycle and returns the resulting
    /// [`Decision`], updating the controller's mode and metrics.
    pub fn evaluate(&mut self, now: Instant) -> Decision {
        let eval_start = Instant::now();
        let features = self.detector.features(now);
        let workload = self.detector.classify(&features);
        let (proposed, reason, confidence) = select_mode(&features, workload, &self.config);

        let gated = self.gate(proposed, confidence, reason, workload, features, now);
        let mode_changed = gated.mode != self.mode;
        if mode_changed {
            info!(
                "rebalance mode transition: {:?} -> {:?} ({})",
                self.mode, gated.mode, gated.reason
            );
            self.last_transition = Some(now);
            if gated.mode == Mode::Lazy {
                self.lazy_reached = true;
            }
        }
        self.mode = gated.mode;

        self.metrics.record_evaluation(&gated, mode_changed, eval_start.elapsed());
        gated
    }

    /// Applies the safety constraints (spec.md §4.10 "Safety constraints")
    /// to a proposed mode, returning the gated [`Decision`].
    fn gate(
        &mut self,
        proposed: Mode,
        confidence: f64,
        reason: &'static str,
        workload: Workload,
        features: WorkloadFeatures,
        now: Instant,
    ) -> Decision {
        let mut mode = proposed;
        let mut reason = reason;

        if confidence < self.config.min_confidence {
            mode = Mode::None;
            reason = "confidence below minimum, falling back to none";
            self.metrics.record_selector_error();
        }

        if mode == Mode::Incremental && !self.lazy_reached && self.mode != Mode::Lazy {
            mode = Mode::Lazy;
            reason = "incremental requires lazy as a prerequisite";
        }

        if !self.config.allows(mode) {
            mode = Mode::None;
            reason = "mode excluded by allowed_modes";
        }

        if mode != self.mode {
            if let Some(last) = self.last_transition {
                if now.duration_since(last) < self.config.min_stability_period {
                    mode = self.mode;
                    reason = "stability period not yet elapsed, keeping previous mode";
                    self.metrics.record_transition_error();
                }
            }
        }

        Decision {
            mode,
            reason,
            confidence,
            workload,
            features,
            timestamp: now,
        }
    }
}

/// Background worker for `incremental` mode (spec.md §5): wakes on
/// `interval`, drains underflowing nodes for up to `budget`, then sleeps.
/// The actual merge work is supplied by the caller through `drain_batch`.
pub struct IncrementalWorker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IncrementalWorker {
    /// Spawns the worker thread. `drain_batch(budget)` is called once per
    /// wake-up and should perform merges until either the underflow set is
    /// empty or `budget` has elapsed, whichever comes first.
    pub fn spawn<F>(interval: Duration, budget: Duration, mut drain_batch: F) -> Self
    where
        F: FnMut(Duration) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let handle = std::thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                drain_batch(budget);
            }
        });
        IncrementalWorker {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signals the worker to stop and joins its thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IncrementalWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
