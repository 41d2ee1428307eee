use serde::{Deserialize, Serialize};

/// Column types supported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Date,
    Timestamp,
    String,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedField {
    pub id: i32,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: PrimitiveType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl NestedField {
    pub fn optional(id: i32, name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.into(),
            required: false,
            field_type,
            doc: None,
        }
    }

    pub fn required(id: i32, name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            required: true,
            ..Self::optional(id, name, field_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Schema {
    pub schema_id: i32,
    pub fields: Vec<NestedField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier_field_ids: Vec<i32>,
}

impl Schema {
    pub fn new(schema_id: i32, fields: Vec<NestedField>) -> Self {
        Self {
            schema_id,
            fields,
            identifier_field_ids: Vec::new(),
        }
    }

    pub fn highest_field_id(&self) -> i32 {
        self.fields.iter().map(|f| f.id).max().unwrap_or(0)
    }

    pub fn field_by_id(&self, id: i32) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a column in row order.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Structural equality ignoring the schema id.
    pub fn same_structure(&self, other: &Schema) -> bool {
        self.fields == other.fields && self.identifier_field_ids == other.identifier_field_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_schema_json() {
        let json = r#"
        {
          "schema-id": 0,
          "fields": [
            { "id": 1, "name": "col1", "required": false, "type": "int" },
            { "id": 2, "name": "col2", "required": false, "type": "string" }
          ]
        }
        "#;

        let schema: Schema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.highest_field_id(), 2);
        assert_eq!(schema.field_by_name("col2").unwrap().field_type, PrimitiveType::String);
        assert_eq!(schema.field_index("col2"), Some(1));
    }

    #[test]
    fn structure_ignores_schema_id() {
        let a = Schema::new(0, vec![NestedField::optional(1, "col1", PrimitiveType::Int)]);
        let mut b = a.clone();
        b.schema_id = 7;
        assert!(a.same_structure(&b));

        b.fields[0].required = true;
        assert!(!a.same_structure(&b));
    }
}
