// Rows and Predicates
//
// Data files hold rows as positional datums ordered like the schema
// fields. Predicates are the small filter language shared by the
// copy-on-write writer and projection views.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::metadata::{PrimitiveType, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    fn fits(&self, field_type: PrimitiveType) -> bool {
        use PrimitiveType::*;
        match self {
            Datum::Null => true,
            Datum::Boolean(_) => field_type == Boolean,
            Datum::Int(_) => matches!(field_type, Int | Long | Date | Timestamp | Float | Double),
            Datum::Float(_) => matches!(field_type, Float | Double),
            Datum::String(_) => matches!(field_type, String | Binary),
        }
    }

    /// SQL-style comparison: anything involving null is unordered.
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Boolean(a), Datum::Boolean(b)) => Some(a.cmp(b)),
            (Datum::Int(a), Datum::Int(b)) => Some(a.cmp(b)),
            (Datum::Float(a), Datum::Float(b)) => a.partial_cmp(b),
            (Datum::Int(a), Datum::Float(b)) => (*a as f64).partial_cmp(b),
            (Datum::Float(a), Datum::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Datum::String(a), Datum::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int(v as i64)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

pub type Row = Vec<Datum>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RowError {
    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    #[error("row has {actual} values, schema has {expected} columns")]
    Arity { expected: usize, actual: usize },

    #[error("column `{column}` does not accept {value:?}")]
    TypeMismatch { column: String, value: Datum },

    #[error("column `{0}` is required")]
    NullInRequired(String),
}

/// Check a row against the column list of a schema.
pub fn validate_row(schema: &Schema, row: &[Datum]) -> Result<(), RowError> {
    if row.len() != schema.fields.len() {
        return Err(RowError::Arity {
            expected: schema.fields.len(),
            actual: row.len(),
        });
    }
    for (field, value) in schema.fields.iter().zip(row) {
        if value.is_null() && field.required {
            return Err(RowError::NullInRequired(field.name.clone()));
        }
        if !value.fits(field.field_type) {
            return Err(RowError::TypeMismatch {
                column: field.name.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Datum,
    },
    Between {
        column: String,
        low: Datum,
        high: Datum,
    },
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Datum>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn between(column: impl Into<String>, low: impl Into<Datum>, high: impl Into<Datum>) -> Self {
        Predicate::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Predicate::Compare { column, .. } | Predicate::Between { column, .. } => column,
        }
    }

    pub fn evaluate(&self, schema: &Schema, row: &[Datum]) -> Result<bool, RowError> {
        let idx = schema
            .field_index(self.column())
            .ok_or_else(|| RowError::UnknownColumn(self.column().to_string()))?;
        let datum = &row[idx];

        let matched = match self {
            Predicate::Compare { op, value, .. } => match datum.compare(value) {
                None => false,
                Some(ord) => match op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::NotEq => ord != Ordering::Equal,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::LtEq => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::GtEq => ord != Ordering::Less,
                },
            },
            Predicate::Between { low, high, .. } => {
                matches!(datum.compare(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(datum.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
        };
        Ok(matched)
    }
}

/// `SET column = value` in an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub column: String,
    pub value: Datum,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NestedField;

    fn schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::optional(1, "col1", PrimitiveType::Int),
                NestedField::optional(2, "col2", PrimitiveType::String),
            ],
        )
    }

    #[test]
    fn rows_serialize_positionally() {
        let row: Row = vec![Datum::Int(30), Datum::Null];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, "[30,null]");

        let back: Row = serde_json::from_str(r#"[10,"mystring"]"#).unwrap();
        assert_eq!(back, vec![Datum::Int(10), Datum::from("mystring")]);
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let schema = schema();
        assert!(validate_row(&schema, &[Datum::Int(1), Datum::Null]).is_ok());
        assert!(matches!(
            validate_row(&schema, &[Datum::Int(1)]),
            Err(RowError::Arity { .. })
        ));
        assert!(matches!(
            validate_row(&schema, &[Datum::from("x"), Datum::Null]),
            Err(RowError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn predicates_treat_null_as_unmatched() {
        let schema = schema();
        let between = Predicate::between("col1", 20, 50);
        assert!(between.evaluate(&schema, &[Datum::Int(20), Datum::Null]).unwrap());
        assert!(between.evaluate(&schema, &[Datum::Int(50), Datum::Null]).unwrap());
        assert!(!between.evaluate(&schema, &[Datum::Int(60), Datum::Null]).unwrap());

        let not_eq = Predicate::compare("col2", CompareOp::NotEq, "a");
        assert!(!not_eq.evaluate(&schema, &[Datum::Int(1), Datum::Null]).unwrap());

        let unknown = Predicate::compare("nope", CompareOp::Eq, 1);
        assert!(matches!(
            unknown.evaluate(&schema, &[Datum::Int(1), Datum::Null]),
            Err(RowError::UnknownColumn(_))
        ));
    }
}
