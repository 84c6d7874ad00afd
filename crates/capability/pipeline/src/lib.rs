//! 扇出分发与批量聚合。
//!
//! ```text
//! Source -> FanoutDistributor -> (每个写入端一条有界队列) -> BatchAggregator -> PointSink
//! ```
//!
//! 各阶段只通过有界队列通信：分发端永不阻塞，队列满时丢弃最新事件并计数；
//! 聚合端以短超时拉取，保证无新数据时也能按时间阈值刷盘。

pub mod aggregator;
pub mod fanout;

pub use aggregator::{AggregatorConfig, AggregatorStats, BatchAggregator};
pub use fanout::{DistributeOutcome, EventReceiver, FanoutDistributor};

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("queue full: {0}")]
    QueueFull(String),
    #[error("queue closed: {0}")]
    QueueClosed(String),
}
