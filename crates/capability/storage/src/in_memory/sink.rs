//! 内存写入端
//!
//! 记录每次成功写入的批次；可注入失败，用于验证重试与丢弃策略。

use crate::error::StorageError;
use crate::traits::PointSink;
use domain::{Point, TimePrecision};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 内存写入端
#[derive(Default)]
pub struct InMemoryPointSink {
    batches: RwLock<Vec<Vec<Point>>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryPointSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来的 `count` 次写入返回不可达错误。
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// 持续不可达，直到再次设为 false。
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 成功写入的批次（按写入顺序）。
    pub fn batches(&self) -> Vec<Vec<Point>> {
        self.batches.read().map(|b| b.clone()).unwrap_or_default()
    }

    /// 成功写入的全部点（按写入顺序）。
    pub fn points(&self) -> Vec<Point> {
        self.batches().into_iter().flatten().collect()
    }

    /// 写入调用次数（含失败）。
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        if self.unavailable.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl PointSink for InMemoryPointSink {
    async fn flush(&self, points: &[Point], _precision: TimePrecision) -> Result<(), StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        let mut batches = self
            .batches
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        batches.push(points.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
