//! 内存写入端实现模块
//!
//! 仅用于测试和 dry-run。

pub mod sink;

pub use sink::*;
