// Partitioning and Sort Orders
//
// Transforms use the Iceberg text form: identity, year, month, day,
// hour, void, bucket[N], truncate[W].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Partition field ids start above this value.
pub const PARTITION_FIELD_ID_START: i32 = 1000;

/// Sort order id 0 is reserved for the unsorted order.
pub const UNSORTED_ORDER_ID: i32 = 0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid transform `{0}`")]
pub struct TransformParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transform {
    Identity,
    Bucket(u32),
    Truncate(u32),
    Year,
    Month,
    Day,
    Hour,
    Void,
}

impl FromStr for Transform {
    type Err = TransformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_arg = |rest: &str| -> Result<u32, TransformParseError> {
            rest.strip_suffix(']')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| TransformParseError(s.to_string()))
        };

        match s {
            "identity" => Ok(Transform::Identity),
            "year" => Ok(Transform::Year),
            "month" => Ok(Transform::Month),
            "day" => Ok(Transform::Day),
            "hour" => Ok(Transform::Hour),
            "void" => Ok(Transform::Void),
            _ => {
                if let Some(rest) = s.strip_prefix("bucket[") {
                    parse_arg(rest).map(Transform::Bucket)
                } else if let Some(rest) = s.strip_prefix("truncate[") {
                    parse_arg(rest).map(Transform::Truncate)
                } else {
                    Err(TransformParseError(s.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
            Transform::Truncate(w) => write!(f, "truncate[{w}]"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
        }
    }
}

impl TryFrom<String> for Transform {
    type Error = TransformParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Transform> for String {
    fn from(value: Transform) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionField {
    pub source_id: i32,
    pub field_id: i32,
    pub name: String,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSpec {
    pub spec_id: i32,
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn unpartitioned() -> Self {
        Self {
            spec_id: 0,
            fields: Vec::new(),
        }
    }

    pub fn highest_field_id(&self) -> Option<i32> {
        self.fields.iter().map(|f| f.field_id).max()
    }

    pub fn same_fields(&self, other: &PartitionSpec) -> bool {
        self.fields == other.fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullOrder {
    NullsFirst,
    NullsLast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SortField {
    pub source_id: i32,
    pub transform: Transform,
    pub direction: SortDirection,
    pub null_order: NullOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SortOrder {
    pub order_id: i32,
    pub fields: Vec<SortField>,
}

impl SortOrder {
    pub fn unsorted() -> Self {
        Self {
            order_id: UNSORTED_ORDER_ID,
            fields: Vec::new(),
        }
    }

    pub fn is_unsorted(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_terms_parse_and_render() {
        for term in [
            "identity",
            "year",
            "month",
            "day",
            "hour",
            "bucket[256]",
            "truncate[16]",
            "void",
        ] {
            let transform: Transform = term.parse().unwrap();
            assert_eq!(transform.to_string(), term);
        }
    }

    #[test]
    fn malformed_transforms_are_rejected() {
        for term in ["bucket[]", "bucket[0]", "truncate[x]", "bucket[4", "squash"] {
            assert!(term.parse::<Transform>().is_err(), "{term} should not parse");
        }
    }

    #[test]
    fn partition_spec_json_uses_transform_strings() {
        let json = r#"{
          "spec-id": 1,
          "fields": [
            { "source-id": 1, "field-id": 1000, "name": "col1_bucket", "transform": "bucket[16]" }
          ]
        }"#;

        let spec: PartitionSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.fields[0].transform, Transform::Bucket(16));
        assert_eq!(spec.highest_field_id(), Some(1000));

        let rendered = serde_json::to_value(&spec).unwrap();
        assert_eq!(rendered["fields"][0]["transform"], "bucket[16]");
    }
}
