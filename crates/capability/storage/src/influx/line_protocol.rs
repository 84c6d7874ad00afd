//! InfluxDB line protocol 编码
//!
//! ```text
//! measurement,tag1=val1 field1=val1,field2=val2 timestamp
//! ```

use chrono::DateTime;
use domain::{FieldValue, Point, TimePrecision};

/// 编码结果：请求体与因时间无法解析而跳过的点数。
#[derive(Debug, Default)]
pub struct EncodedBatch {
    pub body: String,
    pub lines: usize,
    pub skipped: usize,
}

/// 将一批点编码为 line protocol，每点一行。
pub fn encode_points(points: &[Point], precision: TimePrecision) -> EncodedBatch {
    let mut batch = EncodedBatch::default();
    for point in points {
        match encode_point(point, precision) {
            Some(line) => {
                if batch.lines > 0 {
                    batch.body.push('\n');
                }
                batch.body.push_str(&line);
                batch.lines += 1;
            }
            None => batch.skipped += 1,
        }
    }
    batch
}

/// 编码单个点；时间不可解析或没有字段时返回 None。
pub fn encode_point(point: &Point, precision: TimePrecision) -> Option<String> {
    if point.fields.is_empty() {
        return None;
    }
    let timestamp = timestamp(&point.time, precision)?;

    let mut line = escape_measurement(&point.measurement);
    // BTreeMap 迭代即按键排序，符合 InfluxDB 推荐的规范形式
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }
    line.push(' ');
    for (i, (key, value)) in point.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&field_value(value));
    }
    line.push(' ');
    line.push_str(&timestamp.to_string());
    Some(line)
}

fn timestamp(time: &str, precision: TimePrecision) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(time).ok()?;
    match precision {
        TimePrecision::Milliseconds => Some(parsed.timestamp_millis()),
    }
}

fn field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => format!("{}", v),
        FieldValue::Boolean(v) => v.to_string(),
        FieldValue::String(v) => {
            let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\"", escaped)
        }
    }
}

/// 逗号与空格需要转义。
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// 标签键、标签值、字段键：逗号、等号、空格需要转义。
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(measurement: &str, time: &str, value: FieldValue) -> Point {
        Point::with_value(measurement, "dev1", time, value)
    }

    #[test]
    fn encodes_float_point_in_milliseconds() {
        let line = encode_point(
            &point("temp", "2024-01-01T00:00:00.250Z", FieldValue::Float(21.5)),
            TimePrecision::Milliseconds,
        )
        .expect("line");
        assert_eq!(line, "temp,thingId=dev1 value=21.5 1704067200250");
    }

    #[test]
    fn whole_floats_have_no_integer_suffix() {
        let line = encode_point(
            &point("count", "2024-01-01T00:00:00Z", FieldValue::Float(20.0)),
            TimePrecision::Milliseconds,
        )
        .expect("line");
        assert_eq!(line, "count,thingId=dev1 value=20 1704067200000");
    }

    #[test]
    fn escapes_names_and_strings() {
        let line = encode_point(
            &point("door state", "2024-01-01T00:00:00Z", FieldValue::String("say \"hi\"".into())),
            TimePrecision::Milliseconds,
        )
        .expect("line");
        assert_eq!(
            line,
            "door\\ state,thingId=dev1 value=\"say \\\"hi\\\"\" 1704067200000"
        );
    }

    #[test]
    fn unparsable_time_is_skipped() {
        let batch = encode_points(
            &[
                point("a", "yesterday", FieldValue::Boolean(true)),
                point("b", "2024-01-01T00:00:00+01:00", FieldValue::Boolean(false)),
            ],
            TimePrecision::Milliseconds,
        );
        assert_eq!(batch.lines, 1);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.body, "b,thingId=dev1 value=false 1704063600000");
    }
}
