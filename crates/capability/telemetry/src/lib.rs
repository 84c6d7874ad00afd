//! 日志初始化与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_undecodable: u64,
    pub events_invalid_shape: u64,
    pub events_dropped_queue_full: u64,
    pub features_skipped: u64,
    pub points_transformed: u64,
    pub points_written: u64,
    pub flush_success: u64,
    pub flush_failure: u64,
    pub batches_dropped: u64,
    pub points_dropped: u64,
    pub flush_latency_ms_total: u64,
    pub flush_latency_ms_count: u64,
}

/// 进程级指标。
pub struct TelemetryMetrics {
    events_received: AtomicU64,
    events_undecodable: AtomicU64,
    events_invalid_shape: AtomicU64,
    events_dropped_queue_full: AtomicU64,
    features_skipped: AtomicU64,
    points_transformed: AtomicU64,
    points_written: AtomicU64,
    flush_success: AtomicU64,
    flush_failure: AtomicU64,
    batches_dropped: AtomicU64,
    points_dropped: AtomicU64,
    flush_latency_ms_total: AtomicU64,
    flush_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_undecodable: AtomicU64::new(0),
            events_invalid_shape: AtomicU64::new(0),
            events_dropped_queue_full: AtomicU64::new(0),
            features_skipped: AtomicU64::new(0),
            points_transformed: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
            flush_success: AtomicU64::new(0),
            flush_failure: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            points_dropped: AtomicU64::new(0),
            flush_latency_ms_total: AtomicU64::new(0),
            flush_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_undecodable: self.events_undecodable.load(Ordering::Relaxed),
            events_invalid_shape: self.events_invalid_shape.load(Ordering::Relaxed),
            events_dropped_queue_full: self.events_dropped_queue_full.load(Ordering::Relaxed),
            features_skipped: self.features_skipped.load(Ordering::Relaxed),
            points_transformed: self.points_transformed.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            flush_success: self.flush_success.load(Ordering::Relaxed),
            flush_failure: self.flush_failure.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
            flush_latency_ms_total: self.flush_latency_ms_total.load(Ordering::Relaxed),
            flush_latency_ms_count: self.flush_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录事件接收次数。
pub fn record_event_received() {
    metrics().events_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录无法解码的原始报文数（每条报文计一次）。
pub fn record_event_undecodable() {
    metrics().events_undecodable.fetch_add(1, Ordering::Relaxed);
}

/// 记录结构不合规的事件数（缺少标识/时间等）。
///
/// 每个写入端各自规整，同一事件在 N 个写入端上计 N 次。
pub fn record_event_invalid_shape() {
    metrics()
        .events_invalid_shape
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录队列满导致的丢弃次数。
pub fn record_queue_full() {
    metrics()
        .events_dropped_queue_full
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录被跳过的特性数。
pub fn record_features_skipped(count: u64) {
    metrics().features_skipped.fetch_add(count, Ordering::Relaxed);
}

/// 记录规整产出的点数。
pub fn record_points_transformed(count: u64) {
    metrics()
        .points_transformed
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录一次成功刷盘及其点数、耗时。
pub fn record_flush_success(points: u64, latency_ms: u64) {
    let metrics = metrics();
    metrics.flush_success.fetch_add(1, Ordering::Relaxed);
    metrics.points_written.fetch_add(points, Ordering::Relaxed);
    metrics
        .flush_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .flush_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录刷盘失败次数。
pub fn record_flush_failure() {
    metrics().flush_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录整批丢弃（超过保留时长或退出时写入失败）。
pub fn record_batch_dropped(points: u64) {
    let metrics = metrics();
    metrics.batches_dropped.fetch_add(1, Ordering::Relaxed);
    metrics.points_dropped.fetch_add(points, Ordering::Relaxed);
}
