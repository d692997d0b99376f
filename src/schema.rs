use crate::error::{Result, ShareError};
use crate::protocol::FieldIndex;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Null,
    Bool,
    Number,
    BigInt,
    String,
}

impl PrimitiveType {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Null => "null",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Number => "number",
            PrimitiveType::BigInt => "bigint",
            PrimitiveType::String => "string",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(PrimitiveType::Null),
            "bool" | "boolean" => Some(PrimitiveType::Bool),
            "number" => Some(PrimitiveType::Number),
            "bigint" => Some(PrimitiveType::BigInt),
            "string" => Some(PrimitiveType::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    /// Nested shared instance of the named schema definition.
    Composite(String),
}

impl FieldKind {
    pub fn is_composite(&self) -> bool {
        matches!(self, FieldKind::Composite(_))
    }

    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Primitive(ty) => ty.name(),
            FieldKind::Composite(schema) => schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub description: Option<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
        }
    }

    pub fn primitive(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self::new(name, FieldKind::Primitive(ty))
    }

    pub fn composite(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Composite(schema.into()))
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// Ordered field description of a shared type. Field order is the wire
/// order: a field's position is its `FieldIndex`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldSchema>,
    pub description: Option<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Parses `{ "x": "number", "pos": "game.Position" }`. Primitive type
    /// names map to primitive fields, anything else names the declared
    /// schema of a composite field.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let map = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Array(_) => {
                return Err(ShareError::InvalidSchema("schema must be an object, not an array".to_string()))
            }
            other => {
                return Err(ShareError::InvalidSchema(format!("schema must be an object, got {}", other)))
            }
        };

        let mut schema = Schema::new();
        for (name, kind) in map {
            let kind = kind.as_str().ok_or_else(|| {
                ShareError::InvalidSchema(format!("field '{}' must name a type", name))
            })?;

            let field = match PrimitiveType::parse(kind) {
                Some(ty) => FieldSchema::primitive(name.clone(), ty),
                None => FieldSchema::composite(name.clone(), kind),
            };
            schema.fields.push(field);
        }

        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = AHashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(ShareError::InvalidSchema("field names must not be empty".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ShareError::InvalidSchema(format!("duplicate field '{}'", field.name)));
            }
            if let FieldKind::Composite(target) = &field.kind {
                if target.is_empty() {
                    return Err(ShareError::InvalidSchema(format!(
                        "composite field '{}' has no declared schema",
                        field.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn composite_targets(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::Composite(target) => Some(target.as_str()),
            FieldKind::Primitive(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub index: FieldIndex,
    pub name: String,
    pub kind: FieldKind,
}

impl Accessor {
    pub fn slot(&self) -> usize {
        self.index as usize
    }

    pub fn is_composite(&self) -> bool {
        self.kind.is_composite()
    }
}

/// Per-field accessors synthesized from a schema. Shared instances route
/// every read and write through this table.
#[derive(Debug, Clone, Default)]
pub struct AccessorTable {
    accessors: Vec<Accessor>,
    by_name: AHashMap<String, usize>,
}

impl AccessorTable {
    pub fn resolve(&self, name: &str) -> Result<&Accessor> {
        self.by_name
            .get(name)
            .map(|&i| &self.accessors[i])
            .ok_or_else(|| ShareError::UnknownField(name.to_string()))
    }

    pub fn get(&self, index: usize) -> Result<&Accessor> {
        self.accessors
            .get(index)
            .ok_or_else(|| ShareError::UnknownField(format!("#{}", index)))
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.accessors.get(index).map(|a| a.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Accessor> {
        self.accessors.iter()
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

pub fn instrument(schema: &Schema) -> AccessorTable {
    let mut table = AccessorTable::default();
    for (i, field) in schema.fields.iter().enumerate() {
        table.by_name.insert(field.name.clone(), i);
        table.accessors.push(Accessor {
            index: i as FieldIndex,
            name: field.name.clone(),
            kind: field.kind.clone(),
        });
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_from_json_keeps_order() {
        let schema = Schema::from_json(&json!({
            "y": "number",
            "x": "number",
            "label": "string",
            "parent": "game.Node",
        }))
        .unwrap();

        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["y", "x", "label", "parent"]);
        assert_eq!(schema.fields[3].kind, FieldKind::Composite("game.Node".to_string()));
        assert_eq!(schema.composite_targets().collect::<Vec<_>>(), vec!["game.Node"]);
    }

    #[test]
    fn test_schema_from_json_rejects_non_objects() {
        assert!(matches!(
            Schema::from_json(&json!(["x", "y"])),
            Err(ShareError::InvalidSchema(_))
        ));
        assert!(matches!(Schema::from_json(&json!(42)), Err(ShareError::InvalidSchema(_))));
        assert!(matches!(
            Schema::from_json(&json!({ "x": 1 })),
            Err(ShareError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let schema = Schema::new()
            .with_field(FieldSchema::primitive("x", PrimitiveType::Number))
            .with_field(FieldSchema::primitive("x", PrimitiveType::String));

        assert!(matches!(schema.validate(), Err(ShareError::InvalidSchema(_))));
    }

    #[test]
    fn test_instrument() {
        let schema = Schema::new()
            .with_field(FieldSchema::primitive("x", PrimitiveType::Number))
            .with_field(FieldSchema::composite("child", "Node"))
            .with_description("tree node".to_string());

        let table = instrument(&schema);
        assert_eq!(table.len(), 2);

        let child = table.resolve("child").unwrap();
        assert_eq!(child.index, 1);
        assert!(child.is_composite());
        assert_eq!(table.name_of(0), Some("x"));
        assert!(matches!(table.resolve("z"), Err(ShareError::UnknownField(_))));
    }
}
