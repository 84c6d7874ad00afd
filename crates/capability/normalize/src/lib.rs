//! 事件 → 时序点规整，以及通用嵌套结构展平。

use domain::{Event, FieldValue, MODIFIED_FIELD, Point, THING_ID_FIELD};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// 规整错误（整条事件不可用）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("missing identifier field `thingId`")]
    MissingThingId,
    #[error("missing timestamp field `_modified`")]
    MissingModified,
    #[error("`features` is not an object")]
    FeaturesNotObject,
    #[error("event carries no features")]
    NoFeatures,
}

/// 单个特性被跳过的原因。
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFeature {
    pub feature: String,
    pub reason: &'static str,
}

/// 规整结果：可写入的点与被跳过的特性。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub points: Vec<Point>,
    pub skipped: Vec<SkippedFeature>,
}

/// 事件规整策略；每个下游写入端可以持有自己的实现。
pub trait EventTransformer: Send + Sync {
    fn transform(&self, event: &Event) -> Result<Transformed, TransformError>;
}

/// 默认策略：按 `features.<name>.properties.value` 提取，缺少 `features` 时展平整条事件。
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureTransformer;

impl EventTransformer for FeatureTransformer {
    fn transform(&self, event: &Event) -> Result<Transformed, TransformError> {
        flatten(event)
    }
}

/// 将一条事件转换为时序点。
///
/// 每个特性生成一个点：measurement 为特性名，唯一标签为设备标识，
/// 时间为事件自身的修改时间，字段仅有 `value`。
pub fn flatten(event: &Event) -> Result<Transformed, TransformError> {
    let thing_id = event.thing_id().ok_or(TransformError::MissingThingId)?;
    let modified = event.modified().ok_or(TransformError::MissingModified)?;

    match event.features() {
        Some(Value::Object(features)) => Ok(from_features(thing_id, modified, features)),
        Some(_) => Err(TransformError::FeaturesNotObject),
        None => from_flattened(thing_id, modified, event.body()),
    }
}

fn from_features(thing_id: &str, modified: &str, features: &Map<String, Value>) -> Transformed {
    let mut out = Transformed::default();
    for (name, feature) in features {
        let value = feature
            .get("properties")
            .and_then(|properties| properties.get("value"));
        let Some(value) = value else {
            out.skipped.push(SkippedFeature {
                feature: name.clone(),
                reason: "missing properties.value",
            });
            continue;
        };
        match FieldValue::from_json(value) {
            Some(field) => out
                .points
                .push(Point::with_value(name.as_str(), thing_id, modified, field)),
            None => out.skipped.push(SkippedFeature {
                feature: name.clone(),
                reason: "unsupported value type",
            }),
        }
    }
    out
}

fn from_flattened(
    thing_id: &str,
    modified: &str,
    body: &Map<String, Value>,
) -> Result<Transformed, TransformError> {
    let mut rest = body.clone();
    rest.remove(THING_ID_FIELD);
    rest.remove(MODIFIED_FIELD);
    let flat = flatten_nested(&rest);
    if flat.is_empty() {
        return Err(TransformError::NoFeatures);
    }

    let mut out = Transformed::default();
    for (path, value) in flat {
        match FieldValue::from_json(&value) {
            Some(field) => out
                .points
                .push(Point::with_value(path, thing_id, modified, field)),
            None => out.skipped.push(SkippedFeature {
                feature: path,
                reason: "unsupported value type",
            }),
        }
    }
    Ok(out)
}

/// 深度优先展平嵌套对象，键为以 `.` 连接的路径，整数提升为浮点。
///
/// 只有对象会被展开；数组、null、标量都作为叶子保留。空对象不产生键。
/// 键本身含 `.` 时可能与嵌套路径重名（如 `{"a.b": 1, "a": {"b": 2}}`），
/// 此时只保留后访问到的叶子，并记录一条 debug 日志。
pub fn flatten_nested(mapping: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();
    let mut stack: Vec<(&Map<String, Value>, String)> = vec![(mapping, String::new())];

    while let Some((map, prefix)) = stack.pop() {
        for (key, value) in map {
            let path = join_path(&prefix, key);
            match value {
                Value::Object(child) => stack.push((child, path)),
                Value::Number(number) => {
                    insert_leaf(&mut flat, path, Value::Number(promote(number)))
                }
                other => insert_leaf(&mut flat, path, other.clone()),
            }
        }
    }
    flat
}

fn insert_leaf(flat: &mut BTreeMap<String, Value>, path: String, value: Value) {
    if let Some(previous) = flat.insert(path.clone(), value) {
        debug!(
            target: "bridge.normalize",
            path = %path,
            previous = %previous,
            "flattened_key_collision"
        );
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn promote(number: &Number) -> Number {
    if number.is_f64() {
        return number.clone();
    }
    number
        .as_f64()
        .and_then(Number::from_f64)
        .unwrap_or_else(|| number.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn join_path_skips_empty_prefix() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a.b", "c"), "a.b.c");
    }

    #[test]
    fn flatten_nested_keeps_lists_as_leaves() {
        let flat = flatten_nested(&object(json!({"a": {"list": [1, 2]}, "n": null})));
        assert_eq!(flat.get("a.list"), Some(&json!([1, 2])));
        assert_eq!(flat.get("n"), Some(&Value::Null));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn dotted_key_collides_with_nested_path() {
        let flat = flatten_nested(&object(json!({"a.b": 1, "a": {"b": 2}})));
        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key("a.b"));
    }

    #[test]
    fn flatten_nested_ignores_empty_objects() {
        let flat = flatten_nested(&object(json!({"a": {}, "b": {"c": {}}})));
        assert!(flat.is_empty());
    }
}
