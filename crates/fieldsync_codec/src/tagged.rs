//! Native field values and declared field types.

use crate::attachment::Attachment;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

/// Declared semantic type of an entity field.
///
/// Decoding dispatches on this, not on the shape of the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Signed integer.
    Integer,
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Boolean.
    Bool,
    /// Point in time, stored as epoch seconds.
    Date,
    /// URL, stored as its string form.
    Url,
    /// Array of strings.
    StringArray,
    /// Set of member ids, stored as `id -> true`.
    Relation,
    /// Reference to a binary in the attachment store.
    Attachment,
    /// Opaque nested mapping.
    Object,
}

impl FieldType {
    /// Returns the lowercase name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Url => "url",
            FieldType::StringArray => "string array",
            FieldType::Relation => "relation",
            FieldType::Attachment => "attachment",
            FieldType::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A native field value.
///
/// `Null` stands for an unset field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaggedValue {
    /// Unset.
    #[default]
    Null,
    /// String value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Double value.
    Double(f64),
    /// Float value.
    Float(f32),
    /// Boolean value.
    Bool(bool),
    /// Date value.
    Date(DateTime<Utc>),
    /// URL value.
    Url(Url),
    /// String array value.
    StringArray(Vec<String>),
    /// Relation set value.
    Relation(BTreeSet<String>),
    /// Attachment value.
    Attachment(Attachment),
    /// Opaque nested mapping.
    Object(BTreeMap<String, Value>),
}

impl TaggedValue {
    /// Returns the field type this value belongs to, or `None` for `Null`.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            TaggedValue::Null => None,
            TaggedValue::String(_) => Some(FieldType::String),
            TaggedValue::Integer(_) => Some(FieldType::Integer),
            TaggedValue::Double(_) => Some(FieldType::Double),
            TaggedValue::Float(_) => Some(FieldType::Float),
            TaggedValue::Bool(_) => Some(FieldType::Bool),
            TaggedValue::Date(_) => Some(FieldType::Date),
            TaggedValue::Url(_) => Some(FieldType::Url),
            TaggedValue::StringArray(_) => Some(FieldType::StringArray),
            TaggedValue::Relation(_) => Some(FieldType::Relation),
            TaggedValue::Attachment(_) => Some(FieldType::Attachment),
            TaggedValue::Object(_) => Some(FieldType::Object),
        }
    }

    /// Returns true if this value may be stored in a field of `field_type`.
    ///
    /// `Null` fits every field.
    pub fn conforms_to(&self, field_type: FieldType) -> bool {
        self.field_type().map_or(true, |t| t == field_type)
    }

    /// Check if this value is unset.
    pub fn is_null(&self) -> bool {
        matches!(self, TaggedValue::Null)
    }

    /// Get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            TaggedValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TaggedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a relation set.
    pub fn as_relation(&self) -> Option<&BTreeSet<String>> {
        match self {
            TaggedValue::Relation(set) => Some(set),
            _ => None,
        }
    }

    /// Get this value as a string array.
    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            TaggedValue::StringArray(items) => Some(items),
            _ => None,
        }
    }

    /// Get this value as an attachment.
    pub fn as_attachment(&self) -> Option<&Attachment> {
        match self {
            TaggedValue::Attachment(a) => Some(a),
            _ => None,
        }
    }
}

impl From<String> for TaggedValue {
    fn from(s: String) -> Self {
        TaggedValue::String(s)
    }
}

impl From<&str> for TaggedValue {
    fn from(s: &str) -> Self {
        TaggedValue::String(s.to_string())
    }
}

impl From<i64> for TaggedValue {
    fn from(n: i64) -> Self {
        TaggedValue::Integer(n)
    }
}

impl From<f64> for TaggedValue {
    fn from(d: f64) -> Self {
        TaggedValue::Double(d)
    }
}

impl From<f32> for TaggedValue {
    fn from(f: f32) -> Self {
        TaggedValue::Float(f)
    }
}

impl From<bool> for TaggedValue {
    fn from(b: bool) -> Self {
        TaggedValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for TaggedValue {
    fn from(date: DateTime<Utc>) -> Self {
        TaggedValue::Date(date)
    }
}

impl From<Url> for TaggedValue {
    fn from(url: Url) -> Self {
        TaggedValue::Url(url)
    }
}

impl From<Vec<String>> for TaggedValue {
    fn from(items: Vec<String>) -> Self {
        TaggedValue::StringArray(items)
    }
}

impl From<BTreeSet<String>> for TaggedValue {
    fn from(set: BTreeSet<String>) -> Self {
        TaggedValue::Relation(set)
    }
}

impl From<Attachment> for TaggedValue {
    fn from(attachment: Attachment) -> Self {
        TaggedValue::Attachment(attachment)
    }
}

impl<T: Into<TaggedValue>> From<Option<T>> for TaggedValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(TaggedValue::Null, Into::into)
    }
}

/// Membership changes between two versions of a relation set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDiff {
    /// Members present only in the new set, sorted.
    pub added: Vec<String>,
    /// Members present only in the old set, sorted.
    pub removed: Vec<String>,
}

impl RelationDiff {
    /// Computes `new - old` and `old - new`.
    pub fn between(old: &BTreeSet<String>, new: &BTreeSet<String>) -> Self {
        Self {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
        }
    }

    /// Returns true if membership did not change.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
