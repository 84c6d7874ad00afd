//! # Bridge Storage 模块
//!
//! 时序点写入端（Sink）抽象与实现。
//!
//! ## 模块说明
//!
//! - [`traits`]：写入端接口 `PointSink`
//! - [`error`]：写入错误，区分可重试（不可达）与被拒绝
//! - [`in_memory`]：内存写入端，用于测试和 dry-run
//! - [`influx`]：InfluxDB 1.x HTTP 写入端（line protocol，毫秒精度）
//! - [`noop`]：空写入端，用于 dry-run
//!
//! 写入端只负责单次写入；重试、退避与丢弃策略由上层批量聚合器决定。

pub mod error;
pub mod in_memory;
pub mod influx;
pub mod noop;
pub mod traits;

pub use error::StorageError;
pub use in_memory::InMemoryPointSink;
pub use influx::{InfluxConfig, InfluxPointSink, encode_points};
pub use noop::NoopPointSink;
pub use traits::PointSink;
