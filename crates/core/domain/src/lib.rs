//! 桥接进程共享的领域模型。

pub mod data;

pub use data::{
    Event, EventError, FEATURES_FIELD, FieldValue, MODIFIED_FIELD, Point, RawEvent,
    THING_ID_FIELD, TimePrecision,
};
