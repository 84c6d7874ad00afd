//! 采集源抽象与 Ditto SSE 订阅。

mod sse;

pub use sse::{SseDecoder, SseSource, SseSourceConfig};

use async_trait::async_trait;
use domain::RawEvent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("source disconnected")]
    Disconnected,
}

/// RawEvent 处理器。
#[async_trait]
pub trait RawEventHandler: Send + Sync {
    async fn handle(&self, event: RawEvent) -> Result<(), IngestError>;
}

/// 采集源抽象。
///
/// `run` 持续读取直到连接断开（返回错误）或 `cancel` 被触发（返回 `Ok`）。
/// 断线对该采集源是致命的，重连由外部进程管理决定。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(
        &self,
        handler: Arc<dyn RawEventHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError>;
}

/// 占位源（用于接线与测试），等待取消后返回。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(
        &self,
        _handler: Arc<dyn RawEventHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        cancel.cancelled().await;
        Ok(())
    }
}

pub(crate) fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
