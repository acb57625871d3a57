use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FeedError, Result};

/// Chart annotation anchored to a bar.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Mark {
    pub id: Value,
    pub time: i64,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "labelFontColor", default)]
    pub label_font_color: String,
    #[serde(rename = "minSize", default)]
    pub min_size: i64,
}

/// Annotation rendered on the time scale rather than on a bar.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimescaleMark {
    pub id: Value,
    pub time: i64,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tooltip: String,
}

pub const MARK_FIELDS: &[&str] = &[
    "id",
    "time",
    "color",
    "text",
    "label",
    "labelFontColor",
    "minSize",
];

pub const TIMESCALE_MARK_FIELDS: &[&str] = &["id", "time", "color", "label", "tooltip"];

/// The marks endpoints answer in one of two shapes: one record per event, or
/// parallel arrays indexed by position with the `id` array establishing the
/// element count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MarksPayload {
    Rows(Vec<Map<String, Value>>),
    Columnar(Map<String, Value>),
}

/// Positional extraction shared by both payload shapes: array values are
/// indexed, scalar values apply to every record. Also used to flatten the
/// columnar symbol group payloads.
pub(crate) fn extract_field(data: &Map<String, Value>, field: &str, index: usize) -> Value {
    match data.get(field) {
        Some(Value::Array(items)) => items.get(index).cloned().unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

impl MarksPayload {
    /// One row object per event regardless of the input shape.
    pub fn into_rows(self, fields: &[&str]) -> Vec<Map<String, Value>> {
        match self {
            MarksPayload::Rows(rows) => rows,
            MarksPayload::Columnar(data) => {
                let count = data
                    .get("id")
                    .and_then(Value::as_array)
                    .map(|ids| ids.len())
                    .unwrap_or(0);
                (0..count)
                    .map(|index| {
                        fields
                            .iter()
                            .filter_map(|field| {
                                // Dropping nulls lets serde defaults fill the gap.
                                let value = extract_field(&data, field, index);
                                (!value.is_null()).then(|| (field.to_string(), value))
                            })
                            .collect()
                    })
                    .collect()
            }
        }
    }
}

/// Decode a marks response into typed records, normalizing columnar payloads.
pub fn parse_marks<T: DeserializeOwned>(response: Value, fields: &[&str]) -> Result<Vec<T>> {
    let payload: MarksPayload = serde_json::from_value(response)?;
    payload
        .into_rows(fields)
        .into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(FeedError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_row_oriented_payload_through() {
        let raw = serde_json::json!([
            {"id": 1, "time": 1700000000, "color": "red", "text": "earnings", "label": "E"},
            {"id": 2, "time": 1700086400, "color": "blue", "text": "dividend", "label": "D"}
        ]);
        let marks: Vec<Mark> = parse_marks(raw, MARK_FIELDS).expect("row payload parses");
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].time, 1700000000);
        assert_eq!(marks[1].text, "dividend");
        assert_eq!(marks[0].label_font_color, "");
    }

    #[test]
    fn flattens_columnar_payload_by_id_count() {
        let raw = serde_json::json!({
            "id": [10, 11, 12],
            "time": [1, 2, 3],
            "color": "green",
            "label": ["a", "b", "c"],
            "tooltip": ["x", "y", "z"]
        });
        let marks: Vec<TimescaleMark> =
            parse_marks(raw, TIMESCALE_MARK_FIELDS).expect("columnar payload parses");
        assert_eq!(marks.len(), 3);
        assert_eq!(marks[1].time, 2);
        // Scalar column applies to every record.
        assert!(marks.iter().all(|m| m.color == "green"));
        assert_eq!(marks[2].tooltip, "z");
    }

    #[test]
    fn columnar_payload_without_ids_yields_no_records() {
        let raw = serde_json::json!({"time": [1, 2, 3]});
        let marks: Vec<Mark> = parse_marks(raw, MARK_FIELDS).expect("parses");
        assert!(marks.is_empty());
    }

    #[test]
    fn missing_columns_default_instead_of_failing() {
        let raw = serde_json::json!({
            "id": ["m1"],
            "time": [42]
        });
        let marks: Vec<Mark> = parse_marks(raw, MARK_FIELDS).expect("sparse payload parses");
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].time, 42);
        assert_eq!(marks[0].color, "");
        assert_eq!(marks[0].min_size, 0);
    }
}
