//! 采集链路装配模块
//!
//! 将采集源、扇出分发器、各写入端的批量聚合器组装为完整链路：
//! 采集源读取原始报文，解码为事件后扇出到每个写入端的有界队列，
//! 聚合器各自规整、攒批并写入。各任务只通过队列通信，一个写入端停滞不影响其他写入端。

use bridge_cache::{BoundedCache, CacheError};
use bridge_config::BatchSettings;
use bridge_ingest::{IngestError, RawEventHandler, Source};
use bridge_normalize::EventTransformer;
use bridge_pipeline::{AggregatorConfig, AggregatorStats, BatchAggregator, FanoutDistributor};
use bridge_storage::PointSink;
use bridge_telemetry::{record_event_received, record_event_undecodable};
use domain::{Event, RawEvent};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 一个下游写入端及其规整策略。
pub struct SinkBinding {
    pub name: String,
    pub sink: Arc<dyn PointSink>,
    pub transformer: Arc<dyn EventTransformer>,
}

/// 扇出处理器
///
/// 实现 `RawEventHandler`：解码原始报文并交给扇出分发器。
/// 解码失败的报文记录后跳过，不影响后续事件。
struct FanoutHandler {
    distributor: FanoutDistributor,
    /// 已见设备（thingId → 首次出现时间），仅用于首次出现日志
    known_things: BoundedCache<String, i64>,
}

#[async_trait::async_trait]
impl RawEventHandler for FanoutHandler {
    async fn handle(&self, raw: RawEvent) -> Result<(), IngestError> {
        record_event_received();
        let event = match Event::from_json(&raw.payload) {
            Ok(event) => event,
            Err(err) => {
                record_event_undecodable();
                warn!(
                    target: "bridge.ingest",
                    error = %err,
                    payload_size = raw.payload.len(),
                    "event_decode_failed"
                );
                return Ok(());
            }
        };

        if let Some(thing_id) = event.thing_id() {
            let key = thing_id.to_string();
            if !self.known_things.contains(&key) {
                info!(target: "bridge.ingest", thing_id = %key, "thing_first_seen");
                self.known_things.update(key, raw.received_at_ms);
            }
        }

        let outcome = self.distributor.distribute(Arc::new(event));
        debug!(
            target: "bridge.ingest",
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "event_distributed"
        );
        Ok(())
    }
}

/// 链路运行结束后的汇总。
pub struct BridgeReport {
    pub source: Result<(), IngestError>,
    pub sinks: Vec<(String, AggregatorStats)>,
}

/// 运行中的链路。
pub struct BridgeHandle {
    source: JoinHandle<Result<(), IngestError>>,
    aggregators: Vec<(String, JoinHandle<AggregatorStats>)>,
}

impl BridgeHandle {
    /// 等待采集源与全部聚合器退出。
    pub async fn wait(self) -> BridgeReport {
        let source = match self.source.await {
            Ok(result) => result,
            Err(err) => Err(IngestError::Source(format!("source task failed: {err}"))),
        };
        let mut sinks = Vec::with_capacity(self.aggregators.len());
        for (name, handle) in self.aggregators {
            match handle.await {
                Ok(stats) => sinks.push((name, stats)),
                Err(err) => error!(sink = %name, error = %err, "aggregator task failed"),
            }
        }
        BridgeReport { source, sinks }
    }
}

/// 由批量参数生成聚合器配置；重试退避上限与时间阈值一致。
pub fn aggregator_config(settings: &BatchSettings) -> AggregatorConfig {
    AggregatorConfig {
        max_batch_size: settings.max_batch_size,
        max_batch_wait: settings.max_batch_wait,
        poll_interval: settings.poll_interval,
        max_batch_retention: settings.max_batch_retention,
        retry_backoff_max: settings.max_batch_wait,
        ..AggregatorConfig::default()
    }
}

/// 启动采集链路
///
/// 每个写入端一条容量为 `queue_capacity` 的队列和一个聚合任务，外加一个采集任务。
/// 采集源失败时触发 `cancel`；采集任务结束后分发器随之释放，队列关闭，聚合器排空后退出。
pub fn spawn_bridge(
    settings: &BatchSettings,
    cache_capacity: usize,
    source: Arc<dyn Source>,
    sinks: Vec<SinkBinding>,
    cancel: CancellationToken,
) -> Result<BridgeHandle, CacheError> {
    let known_things = BoundedCache::new(cache_capacity)?;
    let mut distributor = FanoutDistributor::new();
    let mut aggregators = Vec::with_capacity(sinks.len());

    for binding in sinks {
        let queue = distributor.add_queue(binding.name.clone(), settings.queue_capacity);
        let aggregator = BatchAggregator::new(
            binding.name.clone(),
            binding.sink,
            binding.transformer,
            aggregator_config(settings),
        );
        let handle = tokio::spawn(aggregator.run(queue, cancel.clone()));
        aggregators.push((binding.name, handle));
    }
    info!(
        target: "bridge.ingest",
        sinks = distributor.queue_count(),
        queue_capacity = settings.queue_capacity,
        "bridge_started"
    );

    let handler: Arc<dyn RawEventHandler> = Arc::new(FanoutHandler {
        distributor,
        known_things,
    });
    let source_task = tokio::spawn(async move {
        let result = source.run(handler, cancel.clone()).await;
        if let Err(err) = &result {
            warn!(target: "bridge.ingest", error = %err, "ingest stopped");
            cancel.cancel();
        }
        result
    });

    Ok(BridgeHandle {
        source: source_task,
        aggregators,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_normalize::FeatureTransformer;
    use bridge_storage::InMemoryPointSink;
    use bridge_telemetry::metrics;
    use std::time::Duration;

    /// 依次回放固定报文，然后模拟断线。
    struct ScriptedSource {
        payloads: Vec<String>,
    }

    #[async_trait::async_trait]
    impl Source for ScriptedSource {
        async fn run(
            &self,
            handler: Arc<dyn RawEventHandler>,
            _cancel: CancellationToken,
        ) -> Result<(), IngestError> {
            for payload in &self.payloads {
                handler
                    .handle(RawEvent {
                        payload: payload.clone(),
                        received_at_ms: 1,
                    })
                    .await?;
            }
            Err(IngestError::Disconnected)
        }
    }

    fn settings() -> BatchSettings {
        BatchSettings {
            max_batch_size: 100,
            max_batch_wait: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            max_batch_retention: Duration::from_secs(60),
            queue_capacity: 64,
        }
    }

    fn payload(thing: &str, feature: &str, value: f64) -> String {
        format!(
            r#"{{"thingId":"{thing}","_modified":"2024-01-01T00:00:00Z","features":{{"{feature}":{{"properties":{{"value":{value}}}}}}}}}"#
        )
    }

    #[tokio::test]
    async fn source_disconnect_drains_every_sink() {
        let first = Arc::new(InMemoryPointSink::new());
        let second = Arc::new(InMemoryPointSink::new());
        let source = Arc::new(ScriptedSource {
            payloads: vec![
                payload("dev1", "temp", 21.5),
                "not json".to_string(),
                payload("dev2", "hum", 40.0),
                r#"{"_modified":"2024-01-01T00:00:00Z","features":{}}"#.to_string(),
            ],
        });
        let cancel = CancellationToken::new();
        let before = metrics().snapshot();
        let bridge = spawn_bridge(
            &settings(),
            4,
            source,
            vec![
                SinkBinding {
                    name: "first".to_string(),
                    sink: first.clone(),
                    transformer: Arc::new(FeatureTransformer),
                },
                SinkBinding {
                    name: "second".to_string(),
                    sink: second.clone(),
                    transformer: Arc::new(FeatureTransformer),
                },
            ],
            cancel.clone(),
        )
        .expect("bridge");

        let report = bridge.wait().await;
        assert!(matches!(report.source, Err(IngestError::Disconnected)));
        assert!(cancel.is_cancelled());
        assert_eq!(report.sinks.len(), 2);
        for (_, stats) in &report.sinks {
            assert_eq!(stats.events_received, 3);
            assert_eq!(stats.events_malformed, 1);
            assert_eq!(stats.points_flushed, 2);
        }
        assert_eq!(first.points().len(), 2);
        assert_eq!(second.points().len(), 2);
        assert_eq!(first.points()[0].measurement, "temp");

        // 解码失败按报文计一次；结构错误按写入端各计一次
        let after = metrics().snapshot();
        assert_eq!(after.events_undecodable - before.events_undecodable, 1);
        assert_eq!(after.events_invalid_shape - before.events_invalid_shape, 2);
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let _guard = runtime.enter();
        let result = spawn_bridge(
            &settings(),
            0,
            Arc::new(ScriptedSource { payloads: Vec::new() }),
            Vec::new(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(CacheError::InvalidCapacity(0))));
    }

    #[test]
    fn aggregator_config_follows_batch_settings() {
        let config = aggregator_config(&settings());
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.retry_backoff_max, Duration::from_secs(2));
        assert_eq!(config.max_batch_retention, Duration::from_secs(60));
    }
}
