//! Record-type registry and payload validation.
//!
//! Every record that crosses the sync boundary names a record type. The
//! registry says which types exist, what their payloads must look like and
//! whether concurrent edits of that type may be merged field by field.

use crate::{error::Result, ChangeKind, Error, NewChange, PendingChange, RecordType, SyncRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field types a payload field can be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int | FieldType::Timestamp => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        };
        f.write_str(name)
    }
}

/// One declared payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Check the field's value in a payload object. A JSON `null` counts as absent.
    pub fn check(&self, value: Option<&Value>) -> Result<()> {
        let value = match value {
            Some(Value::Null) | None => {
                return if self.required {
                    Err(Error::MissingRequiredField(self.name.clone()))
                } else {
                    Ok(())
                };
            }
            Some(v) => v,
        };

        if self.field_type.accepts(value) {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type.to_string(),
            got: json_kind(value).to_string(),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Whether concurrent edits of a record type may be combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeCapability {
    /// Conflicts are settled by picking one side
    #[default]
    None,
    /// Object payloads are merged key by key, one level deep
    ShallowObject,
}

/// Registration of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSchema {
    pub name: RecordType,
    /// Declared fields; an empty list accepts any payload object
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub merge: MergeCapability,
}

impl TypeSchema {
    pub fn new(name: impl Into<RecordType>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            merge: MergeCapability::None,
        }
    }

    /// Declare the type mergeable.
    pub fn mergeable(mut self) -> Self {
        self.merge = MergeCapability::ShallowObject;
        self
    }

    /// Validate a live payload against the declared fields.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let Some(object) = payload.as_object() else {
            return Err(Error::InvalidPayload(format!(
                "{} payload must be an object, got {}",
                self.name,
                json_kind(payload)
            )));
        };

        self.fields
            .iter()
            .try_for_each(|field| field.check(object.get(&field.name)))
    }
}

/// The registry of record types known to this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Registered types, ordered by name
    pub types: BTreeMap<RecordType, TypeSchema>,
    /// Accept record types that were never registered
    #[serde(default)]
    pub allow_unknown: bool,
}

impl Schema {
    /// An empty registry that rejects every type.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that accepts any type and any payload.
    pub fn permissive() -> Self {
        Self {
            types: BTreeMap::new(),
            allow_unknown: true,
        }
    }

    pub fn register(&mut self, schema: TypeSchema) -> &mut Self {
        self.types.insert(schema.name.clone(), schema);
        self
    }

    /// Builder-style registration.
    pub fn with_type(mut self, schema: TypeSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, record_type: &str) -> Option<&TypeSchema> {
        self.types.get(record_type)
    }

    /// Merge capability of a type; unregistered types never merge.
    pub fn merge_capability(&self, record_type: &str) -> MergeCapability {
        self.get(record_type)
            .map(|t| t.merge)
            .unwrap_or(MergeCapability::None)
    }

    /// Look a type up, honouring `allow_unknown`.
    fn lookup(&self, record_type: &str) -> Result<Option<&TypeSchema>> {
        match self.types.get(record_type) {
            Some(schema) => Ok(Some(schema)),
            None if self.allow_unknown => Ok(None),
            None => Err(Error::UnknownRecordType(record_type.to_string())),
        }
    }

    fn validate_mutation(
        &self,
        record_type: &str,
        kind: ChangeKind,
        payload: Option<&Value>,
    ) -> Result<()> {
        let schema = self.lookup(record_type)?;
        if kind == ChangeKind::Delete {
            return Ok(());
        }

        let payload = payload.ok_or_else(|| {
            Error::InvalidPayload(format!("{kind} of {record_type} carries no payload"))
        })?;
        match schema {
            Some(schema) => schema.validate_payload(payload),
            None => Ok(()),
        }
    }

    /// Validate a change before it is queued.
    pub fn validate_change(&self, change: &NewChange) -> Result<()> {
        self.validate_mutation(&change.record_type, change.kind, change.payload.as_ref())
    }

    /// Validate a queued change before it is uploaded.
    pub fn validate_pending(&self, change: &PendingChange) -> Result<()> {
        self.validate_mutation(&change.record_type, change.kind, change.payload.as_ref())
    }

    /// Validate a record received from the server. Tombstones skip payload checks.
    pub fn validate_record(&self, record: &SyncRecord) -> Result<()> {
        let schema = self.lookup(&record.record_type)?;
        match schema {
            Some(schema) if record.is_active() => schema.validate_payload(&record.payload),
            _ => Ok(()),
        }
    }
}
