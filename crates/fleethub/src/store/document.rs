//! Document addressing and field-merge semantics.
//!
//! Documents are JSON objects grouped in collections addressed by
//! slash-separated paths. Writes never replace a whole document; they apply a
//! list of [`FieldUpdate`]s to the named top-level fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Identity returned by a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a collection, e.g. `artifacts/acme/public/data/cars`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// The vehicle collection of a tenant.
    #[must_use]
    pub fn cars_for_tenant(tenant_id: &str) -> Self {
        Self(format!("artifacts/{tenant_id}/public/data/cars"))
    }

    /// Wrap an arbitrary collection path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The path as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference to a document in this collection.
    #[must_use]
    pub fn doc(&self, id: impl Into<String>) -> DocumentRef {
        DocumentRef {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    /// Owning collection.
    pub collection: CollectionPath,
    /// Document id within the collection.
    pub id: String,
}

impl DocumentRef {
    /// Full document path.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Store-assigned id.
    pub id: String,
    /// Top-level fields.
    pub fields: Map<String, Value>,
}

/// Full point-in-time contents of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    /// Store revision the snapshot was read at.
    pub revision: u64,
    /// Documents in insertion order.
    pub documents: Vec<Document>,
}

/// Notification that a collection changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    /// The collection that changed.
    pub collection: String,
    /// Store revision after the change.
    pub revision: u64,
}

/// Duplicate handling for [`FieldUpdate::ArrayUnion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayUnionMode {
    /// Skip elements equal by value to an element already in the array.
    #[default]
    ValueEquality,
    /// Always append.
    Append,
}

/// One named-field change within a merge update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Replace the field's value.
    Set(String, Value),
    /// Append elements to an array field.
    ArrayUnion(String, Vec<Value>),
    /// Add to a numeric field.
    Increment(String, Number),
}

impl FieldUpdate {
    /// Replace `field` with `value`.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set(field.into(), value.into())
    }

    /// Append `element` to the array `field`.
    pub fn array_union(field: impl Into<String>, element: impl Into<Value>) -> Self {
        Self::ArrayUnion(field.into(), vec![element.into()])
    }

    /// Add `by` to the numeric `field`.
    pub fn increment(field: impl Into<String>, by: impl Into<Number>) -> Self {
        Self::Increment(field.into(), by.into())
    }

    /// Name of the field this update touches.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Set(field, _) | Self::ArrayUnion(field, _) | Self::Increment(field, _) => field,
        }
    }
}

/// Apply merge updates to a document's fields in order.
///
/// Fields not named by any update are left untouched. An array-union on a
/// missing or non-array field starts a fresh array; an increment on a missing
/// or non-numeric field sets it to the increment.
pub fn apply_updates(fields: &mut Map<String, Value>, updates: &[FieldUpdate], mode: ArrayUnionMode) {
    for update in updates {
        match update {
            FieldUpdate::Set(name, value) => {
                fields.insert(name.clone(), value.clone());
            }
            FieldUpdate::ArrayUnion(name, elements) => {
                let slot = fields
                    .entry(name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                if let Value::Array(items) = slot {
                    for element in elements {
                        if mode == ArrayUnionMode::ValueEquality && items.contains(element) {
                            continue;
                        }
                        items.push(element.clone());
                    }
                }
            }
            FieldUpdate::Increment(name, by) => {
                let current = fields.get(name).and_then(Value::as_number);
                let next = match current {
                    Some(current) => add_numbers(current, by),
                    None => Value::Number(by.clone()),
                };
                fields.insert(name.clone(), next);
            }
        }
    }
}

/// Largest magnitude at which every whole `f64` is exact.
const MAX_EXACT_WHOLE: f64 = 9_007_199_254_740_992.0;

/// JSON number for a float, written as an integer when it is whole.
///
/// `250.0` becomes `250`, so amounts compare equal to the same amount
/// written by clients that store integers. Non-finite input becomes `0`.
#[must_use]
#[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
pub fn json_number(value: f64) -> Number {
    if !value.is_finite() {
        return Number::from(0);
    }
    if value.fract() == 0.0 && value.abs() <= MAX_EXACT_WHOLE {
        return Number::from(value as i64);
    }
    Number::from_f64(value).unwrap_or_else(|| Number::from(0))
}

/// Numeric addition; whole results stay integers.
fn add_numbers(a: &Number, b: &Number) -> Value {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Value::Number(json_number(sum))
}
