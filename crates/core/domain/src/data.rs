use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 设备标识字段名。
pub const THING_ID_FIELD: &str = "thingId";
/// 修改时间字段名。
pub const MODIFIED_FIELD: &str = "_modified";
/// 特性集合字段名。
pub const FEATURES_FIELD: &str = "features";

/// 采集源输出的原始事件（尚未解码）。
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub payload: String,
    pub received_at_ms: i64,
}

/// 事件解码错误。
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("event is not an object")]
    NotAnObject,
}

/// 解码后的遥测事件。
///
/// 创建后只读；扇出时以 `Arc<Event>` 共享给各个下游队列。
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    body: Map<String, Value>,
}

impl Event {
    pub fn new(body: Map<String, Value>) -> Self {
        Self { body }
    }

    /// 从 JSON 文本解码，顶层必须是对象。
    pub fn from_json(text: &str) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| EventError::InvalidJson(err.to_string()))?;
        Self::try_from(value)
    }

    pub fn thing_id(&self) -> Option<&str> {
        self.body.get(THING_ID_FIELD).and_then(Value::as_str)
    }

    pub fn modified(&self) -> Option<&str> {
        self.body.get(MODIFIED_FIELD).and_then(Value::as_str)
    }

    pub fn features(&self) -> Option<&Value> {
        self.body.get(FEATURES_FIELD)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

impl TryFrom<Value> for Event {
    type Error = EventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(body) => Ok(Self { body }),
            _ => Err(EventError::NotAnObject),
        }
    }
}

/// 时序点字段值。
///
/// 整数统一提升为浮点，避免写入端按首个值推断出不同的字段类型。
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Boolean(bool),
    String(String),
}

impl FieldValue {
    /// 从 JSON 标量转换；null、数组、对象返回 None。
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_f64().map(FieldValue::Float),
            Value::Bool(flag) => Some(FieldValue::Boolean(*flag)),
            Value::String(text) => Some(FieldValue::String(text.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// 写入时声明的时间精度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePrecision {
    #[default]
    Milliseconds,
}

impl TimePrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePrecision::Milliseconds => "ms",
        }
    }
}

/// 规整后的时序点。
///
/// `fields` 至少包含一个字段；`time` 为事件自身的修改时间（RFC 3339）。
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub time: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Point {
    /// 构造单标签、单 `value` 字段的时序点。
    pub fn with_value(
        measurement: impl Into<String>,
        thing_id: impl Into<String>,
        time: impl Into<String>,
        value: FieldValue,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(THING_ID_FIELD.to_string(), thing_id.into());
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value);
        Self {
            measurement: measurement.into(),
            tags,
            time: time.into(),
            fields,
        }
    }
}
