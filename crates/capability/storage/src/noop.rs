//! 空写入端（用于接线与 dry-run）。

use crate::error::StorageError;
use crate::traits::PointSink;
use domain::{Point, TimePrecision};
use tracing::debug;

/// 丢弃所有点，仅记录日志。
#[derive(Debug, Default)]
pub struct NoopPointSink;

#[async_trait::async_trait]
impl PointSink for NoopPointSink {
    async fn flush(&self, points: &[Point], precision: TimePrecision) -> Result<(), StorageError> {
        debug!(
            target: "bridge.storage",
            points = points.len(),
            precision = precision.as_str(),
            "noop_flush"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
