use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;
use serde_json::{Map, Value};
use serde_repr::Deserialize_repr;

/// Field type codes of the bus blob format.
///
/// Class metadata declares schema fields as `[name, code]` pairs using
/// these numeric codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr)]
#[repr(u8)]
pub enum FieldType {
    Unspec = 0,
    Array = 1,
    Table = 2,
    String = 3,
    Int64 = 4,
    Int32 = 5,
    Int16 = 6,
    Bool = 7,
    Double = 8,
}

impl FieldType {
    /// Check a JSON value against this field type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::Unspec => true,
            FieldType::Array => value.is_array(),
            FieldType::Table => value.is_object(),
            FieldType::String => value.is_string(),
            FieldType::Int64 | FieldType::Int32 | FieldType::Int16 => {
                value.is_i64() || value.is_u64()
            }
            FieldType::Bool => value.is_boolean(),
            FieldType::Double => value.is_number(),
        }
    }
}

/// One declared field of a class schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
}

impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (name, ty): (String, FieldType) = Deserialize::deserialize(deserializer)?;
        if name.is_empty() {
            return Err(D::Error::custom("schema field with empty name"));
        }
        Ok(FieldSpec { name, ty })
    }
}

/// An ordered set of declared fields, compiled from class metadata.
///
/// Used three ways: validating configuration blobs, diffing an old
/// configuration against a new one, and projecting dump replies into the
/// caller's output blob.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct BlobSchema {
    fields: Vec<FieldSpec>,
}

impl BlobSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Pick the declared, type-matching fields out of `blob`.
    ///
    /// Nesting is preserved: arrays and tables are copied as-is. Fields
    /// that are absent or carry a mismatched type are skipped.
    pub fn project(&self, blob: &Value) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(obj) = blob.as_object() else {
            return out;
        };
        for field in &self.fields {
            if let Some(value) = obj.get(&field.name) {
                if field.ty.matches(value) {
                    out.insert(field.name.clone(), value.clone());
                }
            }
        }
        out
    }

    /// True when any declared field differs between the two blobs.
    ///
    /// Only declared fields participate; undeclared keys never force a
    /// restart.
    pub fn diff(&self, old: &Value, new: &Value) -> bool {
        self.fields.iter().any(|field| {
            let old_val = old.as_object().and_then(|o| o.get(&field.name));
            let new_val = new.as_object().and_then(|o| o.get(&field.name));
            old_val != new_val
        })
    }
}
