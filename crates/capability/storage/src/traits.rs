//! 写入端接口 Trait 定义

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{Point, TimePrecision};

/// 时序点写入端。
///
/// 一次调用写入整批点；返回 `Ok` 表示整批已被存储接受。
#[async_trait]
pub trait PointSink: Send + Sync {
    async fn flush(&self, points: &[Point], precision: TimePrecision) -> Result<(), StorageError>;

    /// 写入端名称（用于日志）。
    fn name(&self) -> &str {
        "sink"
    }
}
