use crate::PipelineError;
use bridge_telemetry::record_queue_full;
use domain::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 聚合端持有的队列接收端。
pub type EventReceiver = mpsc::Receiver<Arc<Event>>;

struct FanoutOutput {
    name: String,
    sender: mpsc::Sender<Arc<Event>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl FanoutOutput {
    fn try_enqueue(&self, event: Arc<Event>) -> Result<(), PipelineError> {
        self.sender.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PipelineError::QueueFull(self.name.clone()),
            mpsc::error::TrySendError::Closed(_) => PipelineError::QueueClosed(self.name.clone()),
        })
    }
}

/// 单次分发结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributeOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// 扇出分发器。
///
/// 将同一事件（共享只读引用）投递到每条已注册队列。投递使用 `try_send`：
/// 某条队列满或已关闭只影响该队列，记录丢弃后继续下一条，不会阻塞上游读取。
#[derive(Default)]
pub struct FanoutDistributor {
    outputs: Vec<FanoutOutput>,
}

impl FanoutDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一条容量为 `capacity` 的队列，返回其接收端。
    pub fn add_queue(&mut self, name: impl Into<String>, capacity: usize) -> EventReceiver {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.outputs.push(FanoutOutput {
            name: name.into(),
            sender,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        receiver
    }

    pub fn queue_count(&self) -> usize {
        self.outputs.len()
    }

    /// 分发一条事件到所有队列。
    pub fn distribute(&self, event: Arc<Event>) -> DistributeOutcome {
        let mut outcome = DistributeOutcome::default();
        for output in &self.outputs {
            match output.try_enqueue(event.clone()) {
                Ok(()) => {
                    output.delivered.fetch_add(1, Ordering::Relaxed);
                    outcome.delivered += 1;
                    debug!(target: "bridge.fanout", queue = %output.name, "event_enqueued");
                }
                Err(err) => {
                    output.dropped.fetch_add(1, Ordering::Relaxed);
                    outcome.dropped += 1;
                    record_queue_full();
                    warn!(
                        target: "bridge.fanout",
                        queue = %output.name,
                        error = %err,
                        dropped_total = output.dropped.load(Ordering::Relaxed),
                        "event_dropped_queue_full"
                    );
                }
            }
        }
        outcome
    }

    /// 某条队列累计丢弃数。
    pub fn dropped(&self, name: &str) -> Option<u64> {
        self.output(name)
            .map(|output| output.dropped.load(Ordering::Relaxed))
    }

    /// 某条队列累计投递数。
    pub fn delivered(&self, name: &str) -> Option<u64> {
        self.output(name)
            .map(|output| output.delivered.load(Ordering::Relaxed))
    }

    fn output(&self, name: &str) -> Option<&FanoutOutput> {
        self.outputs.iter().find(|output| output.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event(n: u64) -> Arc<Event> {
        Arc::new(
            Event::try_from(json!({"thingId": format!("dev{n}"), "_modified": "t"}))
                .expect("event"),
        )
    }

    #[tokio::test]
    async fn full_queue_does_not_block_others() {
        let mut distributor = FanoutDistributor::new();
        let mut slow = distributor.add_queue("slow", 1);
        let mut fast_a = distributor.add_queue("fast-a", 8);
        let mut fast_b = distributor.add_queue("fast-b", 8);

        assert_eq!(
            distributor.distribute(sample_event(1)),
            DistributeOutcome {
                delivered: 3,
                dropped: 0
            }
        );
        assert_eq!(
            distributor.distribute(sample_event(2)),
            DistributeOutcome {
                delivered: 2,
                dropped: 1
            }
        );

        assert_eq!(distributor.dropped("slow"), Some(1));
        assert_eq!(distributor.delivered("fast-a"), Some(2));
        for rx in [&mut fast_a, &mut fast_b] {
            assert_eq!(rx.recv().await.expect("first").thing_id(), Some("dev1"));
            assert_eq!(rx.recv().await.expect("second").thing_id(), Some("dev2"));
        }
        assert_eq!(slow.recv().await.expect("kept").thing_id(), Some("dev1"));
        assert!(slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_is_counted_as_loss() {
        let mut distributor = FanoutDistributor::new();
        let gone = distributor.add_queue("gone", 4);
        let mut alive = distributor.add_queue("alive", 4);
        drop(gone);

        let outcome = distributor.distribute(sample_event(1));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(distributor.dropped("gone"), Some(1));
        assert!(alive.recv().await.is_some());
    }

    #[test]
    fn unknown_queue_has_no_counters() {
        let distributor = FanoutDistributor::new();
        assert_eq!(distributor.dropped("missing"), None);
        assert_eq!(distributor.queue_count(), 0);
    }
}
