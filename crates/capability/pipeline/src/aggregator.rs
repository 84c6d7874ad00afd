use crate::fanout::EventReceiver;
use bridge_normalize::EventTransformer;
use bridge_storage::{PointSink, StorageError};
use bridge_telemetry::{
    record_batch_dropped, record_event_invalid_shape, record_features_skipped,
    record_flush_failure, record_flush_success, record_points_transformed,
};
use domain::{Event, Point, TimePrecision};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 批量聚合参数。
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// 点数阈值：达到即刷盘。
    pub max_batch_size: usize,
    /// 时间阈值：距上次刷盘超过该时长且批次非空即刷盘。
    pub max_batch_wait: Duration,
    /// 队列拉取超时。
    pub poll_interval: Duration,
    /// 批次持续写入失败的最长保留时长，超过后整批丢弃。
    pub max_batch_retention: Duration,
    pub retry_backoff_initial: Duration,
    pub retry_backoff_max: Duration,
    pub precision: TimePrecision,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_wait: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            max_batch_retention: Duration::from_secs(60),
            retry_backoff_initial: Duration::from_millis(100),
            retry_backoff_max: Duration::from_secs(2),
            precision: TimePrecision::Milliseconds,
        }
    }
}

impl AggregatorConfig {
    fn sanitized(mut self) -> Self {
        if self.max_batch_size == 0 {
            self.max_batch_size = 1;
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = Duration::from_millis(1);
        }
        if self.retry_backoff_max < self.retry_backoff_initial {
            self.retry_backoff_max = self.retry_backoff_initial;
        }
        self
    }
}

/// 聚合器运行统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub events_received: u64,
    pub events_malformed: u64,
    pub features_skipped: u64,
    pub points_appended: u64,
    pub flushes: u64,
    pub points_flushed: u64,
    pub flush_failures: u64,
    pub batches_dropped: u64,
    pub points_dropped: u64,
}

/// 批量聚合器（每个写入端一个实例）。
///
/// 批次长度在刷盘前不超过 `max_batch_size`：单条事件展开出的多余点暂存在
/// `carry` 中，刷盘成功（或整批丢弃）后再补入批次。批次满且写入失败时暂停拉取，
/// 由队列承压，再由分发端丢弃。
pub struct BatchAggregator {
    name: String,
    sink: Arc<dyn PointSink>,
    transformer: Arc<dyn EventTransformer>,
    config: AggregatorConfig,
    batch: Vec<Point>,
    carry: VecDeque<Point>,
    last_flush: Instant,
    failing_since: Option<Instant>,
    next_attempt: Option<Instant>,
    backoff: Duration,
    stats: AggregatorStats,
}

impl BatchAggregator {
    pub fn new(
        name: impl Into<String>,
        sink: Arc<dyn PointSink>,
        transformer: Arc<dyn EventTransformer>,
        config: AggregatorConfig,
    ) -> Self {
        let config = config.sanitized();
        Self {
            name: name.into(),
            sink,
            transformer,
            batch: Vec::with_capacity(config.max_batch_size),
            carry: VecDeque::new(),
            last_flush: Instant::now(),
            failing_since: None,
            next_attempt: None,
            backoff: config.retry_backoff_initial,
            config,
            stats: AggregatorStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前批次点数。
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// 批次与暂存区合计点数。
    pub fn pending(&self) -> usize {
        self.batch.len() + self.carry.len()
    }

    pub fn batch(&self) -> &[Point] {
        &self.batch
    }

    pub fn is_full(&self) -> bool {
        self.batch.len() >= self.config.max_batch_size
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// 规整一条事件并追加到批次，返回追加的点数。
    ///
    /// 格式错误只影响该事件：记录后跳过。
    pub fn accept(&mut self, event: &Event) -> usize {
        self.stats.events_received += 1;
        let transformed = match self.transformer.transform(event) {
            Ok(transformed) => transformed,
            Err(err) => {
                self.stats.events_malformed += 1;
                record_event_invalid_shape();
                warn!(
                    target: "bridge.pipeline",
                    sink = %self.name,
                    thing_id = ?event.thing_id(),
                    error = %err,
                    "event_malformed"
                );
                return 0;
            }
        };

        if !transformed.skipped.is_empty() {
            let skipped = transformed.skipped.len() as u64;
            self.stats.features_skipped += skipped;
            record_features_skipped(skipped);
            for feature in &transformed.skipped {
                debug!(
                    target: "bridge.pipeline",
                    sink = %self.name,
                    thing_id = ?event.thing_id(),
                    feature = %feature.feature,
                    reason = feature.reason,
                    "feature_skipped"
                );
            }
        }

        let appended = transformed.points.len();
        self.stats.points_appended += appended as u64;
        record_points_transformed(appended as u64);
        self.append(transformed.points);
        appended
    }

    fn append(&mut self, points: Vec<Point>) {
        for point in points {
            if self.carry.is_empty() && !self.is_full() {
                self.batch.push(point);
            } else {
                self.carry.push_back(point);
            }
        }
    }

    fn refill(&mut self) {
        while !self.is_full() {
            match self.carry.pop_front() {
                Some(point) => self.batch.push(point),
                None => break,
            }
        }
    }

    /// 刷盘条件：批次满，或非空且距上次刷盘已达时间阈值；失败后需等到退避结束。
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.batch.is_empty() {
            return false;
        }
        if let Some(next_attempt) = self.next_attempt {
            if now < next_attempt {
                return false;
            }
        }
        self.is_full() || now.duration_since(self.last_flush) >= self.config.max_batch_wait
    }

    /// 尝试写入整批。成功清空批次；可重试的失败保留批次。
    pub async fn flush(&mut self, now: Instant) -> Result<usize, StorageError> {
        if self.batch.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        match self.sink.flush(&self.batch, self.config.precision).await {
            Ok(()) => {
                let flushed = self.batch.len();
                self.batch.clear();
                self.last_flush = now;
                self.failing_since = None;
                self.next_attempt = None;
                self.backoff = self.config.retry_backoff_initial;
                self.stats.flushes += 1;
                self.stats.points_flushed += flushed as u64;
                record_flush_success(flushed as u64, started.elapsed().as_millis() as u64);
                info!(
                    target: "bridge.pipeline",
                    sink = %self.name,
                    points = flushed,
                    "batch_flushed"
                );
                self.refill();
                Ok(flushed)
            }
            Err(err) => {
                self.stats.flush_failures += 1;
                record_flush_failure();
                let failing_since = *self.failing_since.get_or_insert(now);
                warn!(
                    target: "bridge.pipeline",
                    sink = %self.name,
                    points = self.batch.len(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "batch_flush_failed"
                );
                if !err.is_retryable() {
                    self.drop_batch(now, "rejected by sink");
                } else if now.duration_since(failing_since) >= self.config.max_batch_retention {
                    self.drop_batch(now, "retention exceeded");
                } else {
                    self.next_attempt = Some(now + self.backoff);
                    self.backoff = (self.backoff * 2).min(self.config.retry_backoff_max);
                }
                Err(err)
            }
        }
    }

    fn drop_batch(&mut self, now: Instant, reason: &'static str) {
        let dropped = self.batch.len();
        self.batch.clear();
        self.last_flush = now;
        self.failing_since = None;
        self.next_attempt = None;
        self.backoff = self.config.retry_backoff_initial;
        self.stats.batches_dropped += 1;
        self.stats.points_dropped += dropped as u64;
        record_batch_dropped(dropped as u64);
        error!(
            target: "bridge.pipeline",
            sink = %self.name,
            points = dropped,
            reason,
            "batch_dropped"
        );
        self.refill();
    }

    fn intake_timeout(&self, now: Instant) -> Duration {
        if self.batch.is_empty() {
            return self.config.poll_interval;
        }
        let mut deadline = self.last_flush + self.config.max_batch_wait;
        if let Some(next_attempt) = self.next_attempt {
            deadline = deadline.max(next_attempt);
        }
        deadline
            .saturating_duration_since(now)
            .min(self.config.poll_interval)
            .max(Duration::from_millis(1))
    }

    /// 主循环：直到取消或队列关闭，然后排空队列并做最后一次刷盘。
    pub async fn run(mut self, mut queue: EventReceiver, cancel: CancellationToken) -> AggregatorStats {
        info!(target: "bridge.pipeline", sink = %self.name, "aggregator_started");
        loop {
            let now = Instant::now();
            if self.should_flush(now) {
                let _ = self.flush(now).await;
            }
            if cancel.is_cancelled() {
                break;
            }

            if self.is_full() {
                // 批次已满且尚未写入成功：暂停拉取，等待下一次重试
                let wait = self
                    .next_attempt
                    .map(|next| next.saturating_duration_since(now))
                    .unwrap_or(self.config.poll_interval);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                continue;
            }

            let timeout = self.intake_timeout(now);
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(timeout, queue.recv()) => match received {
                    Ok(Some(event)) => {
                        self.accept(&event);
                    }
                    Ok(None) => {
                        info!(target: "bridge.pipeline", sink = %self.name, "queue_closed");
                        break;
                    }
                    Err(_) => {}
                },
            }
        }
        self.shutdown(&mut queue).await;
        info!(
            target: "bridge.pipeline",
            sink = %self.name,
            stats = ?self.stats,
            "aggregator_stopped"
        );
        self.stats
    }

    async fn shutdown(&mut self, queue: &mut EventReceiver) {
        queue.close();
        while let Ok(event) = queue.try_recv() {
            if self.is_full() {
                self.final_flush().await;
            }
            self.accept(&event);
        }
        while self.pending() > 0 {
            self.refill();
            self.final_flush().await;
        }
    }

    // 退出阶段每批只尝试一次，失败即丢弃。
    // flush 自身已丢弃该批时，批次里是刚补入的暂存点，尚未写过，留给下一轮。
    async fn final_flush(&mut self) {
        let now = Instant::now();
        let dropped_before = self.stats.batches_dropped;
        if self.flush(now).await.is_err() && self.stats.batches_dropped == dropped_before {
            self.drop_batch(now, "shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_normalize::FeatureTransformer;
    use bridge_storage::InMemoryPointSink;
    use serde_json::json;

    fn event(n: usize) -> Event {
        Event::try_from(json!({
            "thingId": "dev1",
            "_modified": "2024-01-01T00:00:00Z",
            "features": {format!("f{n}"): {"properties": {"value": n}}}
        }))
        .expect("event")
    }

    fn aggregator(sink: Arc<InMemoryPointSink>, config: AggregatorConfig) -> BatchAggregator {
        BatchAggregator::new("memory", sink, Arc::new(FeatureTransformer), config)
    }

    fn config(max_batch_size: usize) -> AggregatorConfig {
        AggregatorConfig {
            max_batch_size,
            ..AggregatorConfig::default()
        }
    }

    #[tokio::test]
    async fn failed_flush_keeps_batch_for_retry() {
        let sink = Arc::new(InMemoryPointSink::new());
        sink.fail_next(1);
        let mut agg = aggregator(sink.clone(), config(100));
        for n in 0..3 {
            agg.accept(&event(n));
        }

        agg.flush(Instant::now()).await.expect_err("injected failure");
        assert_eq!(agg.len(), 3);
        assert!(sink.points().is_empty());

        assert_eq!(agg.flush(Instant::now()).await.expect("retry"), 3);
        assert!(agg.is_empty());
        let mut names: Vec<_> = sink.points().into_iter().map(|p| p.measurement).collect();
        names.sort();
        assert_eq!(names, vec!["f0", "f1", "f2"]);
        assert_eq!(agg.stats().flush_failures, 1);
        assert_eq!(agg.stats().flushes, 1);
    }

    #[tokio::test]
    async fn failure_backs_off_before_next_attempt() {
        let sink = Arc::new(InMemoryPointSink::new());
        sink.set_unavailable(true);
        let mut agg = aggregator(sink.clone(), config(3));
        for n in 0..3 {
            agg.accept(&event(n));
        }
        let now = Instant::now();
        assert!(agg.should_flush(now));
        assert!(agg.flush(now).await.is_err());

        assert!(!agg.should_flush(now));
        assert!(!agg.should_flush(now + Duration::from_millis(50)));
        assert!(agg.should_flush(now + Duration::from_millis(100)));

        assert!(agg.flush(now + Duration::from_millis(100)).await.is_err());
        assert!(!agg.should_flush(now + Duration::from_millis(250)));
        assert!(agg.should_flush(now + Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn retention_exceeded_drops_whole_batch() {
        let sink = Arc::new(InMemoryPointSink::new());
        sink.set_unavailable(true);
        let mut agg = aggregator(
            sink.clone(),
            AggregatorConfig {
                max_batch_retention: Duration::from_secs(1),
                ..config(10)
            },
        );
        for n in 0..4 {
            agg.accept(&event(n));
        }
        let start = Instant::now();
        assert!(agg.flush(start).await.is_err());
        assert_eq!(agg.len(), 4);

        assert!(agg.flush(start + Duration::from_secs(2)).await.is_err());
        assert!(agg.is_empty());
        assert_eq!(agg.stats().batches_dropped, 1);
        assert_eq!(agg.stats().points_dropped, 4);
    }

    #[tokio::test]
    async fn overflow_points_wait_in_carry() {
        let sink = Arc::new(InMemoryPointSink::new());
        let mut agg = aggregator(sink.clone(), config(2));
        let wide = Event::try_from(json!({
            "thingId": "dev1",
            "_modified": "2024-01-01T00:00:00Z",
            "features": {
                "a": {"properties": {"value": 1}},
                "b": {"properties": {"value": 2}},
                "c": {"properties": {"value": 3}}
            }
        }))
        .expect("event");

        assert_eq!(agg.accept(&wide), 3);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.pending(), 3);
        assert!(agg.is_full());

        assert_eq!(agg.flush(Instant::now()).await.expect("flush"), 2);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.batch()[0].measurement, "c");
    }

    #[test]
    fn malformed_event_is_counted_and_skipped() {
        let sink = Arc::new(InMemoryPointSink::new());
        let mut agg = aggregator(sink, config(10));
        let broken = Event::try_from(json!({"_modified": "t", "features": {}})).expect("event");

        assert_eq!(agg.accept(&broken), 0);
        assert_eq!(agg.accept(&event(1)), 1);
        assert_eq!(agg.stats().events_malformed, 1);
        assert_eq!(agg.stats().events_received, 2);
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn zero_batch_size_is_sanitized() {
        let sink = Arc::new(InMemoryPointSink::new());
        let mut agg = aggregator(sink, config(0));
        agg.accept(&event(1));
        assert!(agg.is_full());
    }
}
