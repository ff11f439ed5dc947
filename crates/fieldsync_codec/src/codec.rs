//! Conversion between native field values and stored values.
//!
//! Encoding dispatches on the runtime variant of the [`TaggedValue`];
//! decoding dispatches on the declared [`FieldType`]. The two directions are
//! inverse except for empty collections: an empty string array or relation
//! set is omitted on encode and decodes back to an empty collection.

use crate::attachment::Attachment;
use crate::error::{CodecError, CodecResult};
use crate::tagged::{FieldType, TaggedValue};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

/// Per-field override for values the built-in dispatch cannot represent.
///
/// A `Some` result from either method takes precedence over the built-in
/// conversion for that field; `None` falls through to it.
pub trait FieldCodec: Send + Sync + fmt::Debug {
    /// Converts a field value into its stored form.
    fn encode(&self, field: &str, value: &TaggedValue) -> Option<Value> {
        let _ = (field, value);
        None
    }

    /// Converts a stored value back into a field value.
    fn decode(&self, field: &str, stored: Option<&Value>) -> Option<TaggedValue> {
        let _ = (field, stored);
        None
    }
}

/// Encodes a field value into its stored form.
///
/// Returns `None` when the field must be omitted from the written document:
/// unset values, empty collections and attachments (which are uploaded out
/// of band).
pub fn encode(_field: &str, value: &TaggedValue) -> Option<Value> {
    match value {
        TaggedValue::Null | TaggedValue::Attachment(_) => None,
        TaggedValue::String(s) => Some(Value::Text(s.clone())),
        TaggedValue::Integer(n) => Some(Value::Integer(*n)),
        TaggedValue::Double(d) => Some(Value::Double(*d)),
        TaggedValue::Float(f) => Some(Value::Double(f64::from(*f))),
        TaggedValue::Bool(b) => Some(Value::Bool(*b)),
        TaggedValue::Date(date) => Some(Value::Double(to_epoch_seconds(date))),
        TaggedValue::Url(url) => Some(Value::Text(url.as_str().to_string())),
        TaggedValue::StringArray(items) if items.is_empty() => None,
        TaggedValue::StringArray(items) => Some(Value::Array(
            items.iter().cloned().map(Value::Text).collect(),
        )),
        TaggedValue::Relation(set) if set.is_empty() => None,
        TaggedValue::Relation(set) => Some(Value::Map(
            set.iter().map(|id| (id.clone(), Value::Bool(true))).collect(),
        )),
        TaggedValue::Object(map) => Some(Value::Map(map.clone())),
    }
}

/// Encodes a field value, consulting `codec` first.
pub fn encode_with(codec: Option<&dyn FieldCodec>, field: &str, value: &TaggedValue) -> Option<Value> {
    codec
        .and_then(|c| c.encode(field, value))
        .or_else(|| encode(field, value))
}

/// Decodes a stored value according to the declared field type.
///
/// # Errors
///
/// Returns an error if the stored value is missing or has the wrong shape
/// for `field_type`. Collections never fail on a missing value: they decode
/// to an empty collection.
pub fn try_decode(field: &str, field_type: FieldType, stored: Option<&Value>) -> CodecResult<TaggedValue> {
    let stored = stored.filter(|v| !v.is_null());

    match field_type {
        FieldType::Relation => return decode_relation(field, stored).map(TaggedValue::Relation),
        FieldType::StringArray => {
            return decode_string_array(field, stored).map(TaggedValue::StringArray)
        }
        _ => {}
    }

    let stored = stored.ok_or_else(|| CodecError::missing(field))?;
    let mismatch = || CodecError::type_mismatch(field, field_type, stored.kind());

    match field_type {
        FieldType::String => stored
            .as_text()
            .map(|s| TaggedValue::String(s.to_string()))
            .ok_or_else(mismatch),
        FieldType::Integer => stored.as_integer().map(TaggedValue::Integer).ok_or_else(mismatch),
        FieldType::Double => stored.as_f64().map(TaggedValue::Double).ok_or_else(mismatch),
        FieldType::Float => stored
            .as_f64()
            .map(|d| TaggedValue::Float(d as f32))
            .ok_or_else(mismatch),
        FieldType::Bool => stored.as_bool().map(TaggedValue::Bool).ok_or_else(mismatch),
        FieldType::Date => {
            let seconds = stored.as_f64().ok_or_else(mismatch)?;
            from_epoch_seconds(seconds)
                .map(TaggedValue::Date)
                .ok_or_else(|| CodecError::InvalidDate {
                    field: field.to_string(),
                    seconds,
                })
        }
        FieldType::Url => {
            let text = stored.as_text().ok_or_else(mismatch)?;
            Url::parse(text)
                .map(TaggedValue::Url)
                .map_err(|e| CodecError::InvalidUrl {
                    field: field.to_string(),
                    message: e.to_string(),
                })
        }
        FieldType::Attachment => stored
            .as_text()
            .map(|name| TaggedValue::Attachment(Attachment::new(name)))
            .ok_or_else(mismatch),
        FieldType::Object => stored
            .as_map()
            .map(|m| TaggedValue::Object(m.clone()))
            .ok_or_else(mismatch),
        FieldType::Relation | FieldType::StringArray => Err(mismatch()),
    }
}

/// Decodes a stored value, returning `TaggedValue::Null` on failure.
pub fn decode(field: &str, field_type: FieldType, stored: Option<&Value>) -> TaggedValue {
    try_decode(field, field_type, stored).unwrap_or_default()
}

/// Decodes a stored value, consulting `codec` first.
pub fn decode_with(
    codec: Option<&dyn FieldCodec>,
    field: &str,
    field_type: FieldType,
    stored: Option<&Value>,
) -> CodecResult<TaggedValue> {
    match codec.and_then(|c| c.decode(field, stored)) {
        Some(value) => Ok(value),
        None => try_decode(field, field_type, stored),
    }
}

fn decode_relation(field: &str, stored: Option<&Value>) -> CodecResult<BTreeSet<String>> {
    let Some(stored) = stored else {
        return Ok(BTreeSet::new());
    };
    let map = stored
        .as_map()
        .ok_or_else(|| CodecError::type_mismatch(field, FieldType::Relation, stored.kind()))?;
    Ok(map
        .iter()
        .filter(|(_, member)| member.as_bool() == Some(true))
        .map(|(id, _)| id.clone())
        .collect())
}

fn decode_string_array(field: &str, stored: Option<&Value>) -> CodecResult<Vec<String>> {
    let Some(stored) = stored else {
        return Ok(Vec::new());
    };
    let items = stored
        .as_array()
        .ok_or_else(|| CodecError::type_mismatch(field, FieldType::StringArray, stored.kind()))?;
    items
        .iter()
        .map(|item| {
            item.as_text()
                .map(str::to_string)
                .ok_or_else(|| CodecError::type_mismatch(field, FieldType::StringArray, item.kind()))
        })
        .collect()
}

/// Converts a date to epoch seconds with microsecond precision.
///
/// The result is an `f64`, so microseconds survive a round trip only while
/// `|timestamp_micros| <= 2^53`, roughly the years 1685 to 2255. Beyond that
/// the stored value is off by a few microseconds.
pub fn to_epoch_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp_micros() as f64 / 1_000_000.0
}

/// Converts epoch seconds to a date, rounding to the nearest microsecond.
pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

/// Converts server epoch milliseconds to a date.
pub fn from_epoch_millis(millis: f64) -> Option<DateTime<Utc>> {
    from_epoch_seconds(millis / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn relation(ids: &[&str]) -> TaggedValue {
        TaggedValue::Relation(ids.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn date_is_stored_as_epoch_seconds() {
        let date = Utc.with_ymd_and_hms(2017, 1, 5, 12, 0, 0).unwrap();
        let stored = encode("birth", &TaggedValue::Date(date)).unwrap();
        assert_eq!(stored, Value::Double(1_483_617_600.0));
        assert_eq!(decode("birth", FieldType::Date, Some(&stored)), TaggedValue::Date(date));
    }

    #[test]
    fn far_future_dates_lose_only_microseconds() {
        let date = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_457);
        let back = from_epoch_seconds(to_epoch_seconds(&date)).unwrap();
        let drift = (back - date).num_microseconds().unwrap().abs();
        assert!(drift < 10, "drift {drift}us");
    }

    #[test]
    fn date_accepts_integer_seconds() {
        let decoded = decode("birth", FieldType::Date, Some(&Value::Integer(0)));
        assert_eq!(decoded, TaggedValue::Date(DateTime::from_timestamp(0, 0).unwrap()));
    }

    #[test]
    fn url_roundtrip_and_invalid_url() {
        let url = Url::parse("https://example.com/a?b=c").unwrap();
        let stored = encode("homepage", &TaggedValue::Url(url.clone())).unwrap();
        assert_eq!(stored, Value::Text("https://example.com/a?b=c".into()));
        assert_eq!(decode("homepage", FieldType::Url, Some(&stored)), TaggedValue::Url(url));

        let err = try_decode("homepage", FieldType::Url, Some(&Value::from("not a url"))).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUrl { .. }));
        assert_eq!(
            decode("homepage", FieldType::Url, Some(&Value::from("not a url"))),
            TaggedValue::Null
        );
    }

    #[test]
    fn relation_is_stored_as_true_map() {
        let stored = encode("friends", &relation(&["a", "b"])).unwrap();
        assert_eq!(
            stored,
            Value::map([("a", Value::Bool(true)), ("b", Value::Bool(true))])
        );
        assert_eq!(decode("friends", FieldType::Relation, Some(&stored)), relation(&["a", "b"]));
    }

    #[test]
    fn empty_collections_are_omitted() {
        assert_eq!(encode("friends", &relation(&[])), None);
        assert_eq!(encode("tags", &TaggedValue::StringArray(vec![])), None);
    }

    #[test]
    fn missing_collections_decode_empty() {
        assert_eq!(decode("friends", FieldType::Relation, None), relation(&[]));
        assert_eq!(
            decode("friends", FieldType::Relation, Some(&Value::Map(BTreeMap::new()))),
            relation(&[])
        );
        assert_eq!(
            decode("tags", FieldType::StringArray, Some(&Value::Null)),
            TaggedValue::StringArray(vec![])
        );
    }

    #[test]
    fn relation_ignores_non_true_members() {
        let stored = Value::map([("a", Value::Bool(true)), ("b", Value::Bool(false))]);
        assert_eq!(decode("friends", FieldType::Relation, Some(&stored)), relation(&["a"]));
    }

    #[test]
    fn attachment_encodes_nothing_and_decodes_from_name() {
        let attachment = TaggedValue::Attachment(Attachment::with_payload("p.png", vec![1u8]));
        assert_eq!(encode("photo", &attachment), None);

        let decoded = decode("photo", FieldType::Attachment, Some(&Value::from("p.png")));
        assert_eq!(decoded.as_attachment().map(Attachment::name), Some("p.png"));
        assert!(decoded.as_attachment().unwrap().payload().is_none());
    }

    #[test]
    fn decode_follows_declared_type() {
        let err = try_decode("age", FieldType::Integer, Some(&Value::from("ten"))).unwrap_err();
        assert_eq!(err, CodecError::type_mismatch("age", FieldType::Integer, "text"));

        let err = try_decode("name", FieldType::String, None).unwrap_err();
        assert_eq!(err, CodecError::missing("name"));

        assert_eq!(
            decode("score", FieldType::Double, Some(&Value::Integer(3))),
            TaggedValue::Double(3.0)
        );
    }

    #[test]
    fn null_encodes_to_nothing() {
        assert_eq!(encode("name", &TaggedValue::Null), None);
    }

    #[derive(Debug)]
    struct UpperCase;

    impl FieldCodec for UpperCase {
        fn encode(&self, _field: &str, value: &TaggedValue) -> Option<Value> {
            value.as_str().map(|s| Value::Text(s.to_uppercase()))
        }

        fn decode(&self, _field: &str, stored: Option<&Value>) -> Option<TaggedValue> {
            stored
                .and_then(Value::as_text)
                .map(|s| TaggedValue::String(s.to_lowercase()))
        }
    }

    #[test]
    fn override_codec_takes_precedence() {
        let codec: &dyn FieldCodec = &UpperCase;
        assert_eq!(
            encode_with(Some(codec), "name", &TaggedValue::from("alice")),
            Some(Value::from("ALICE"))
        );
        assert_eq!(
            decode_with(Some(codec), "name", FieldType::String, Some(&Value::from("ALICE"))).unwrap(),
            TaggedValue::from("alice")
        );
        // Falls through to built-in dispatch when the override declines.
        assert_eq!(
            encode_with(Some(codec), "age", &TaggedValue::Integer(3)),
            Some(Value::Integer(3))
        );
    }

    fn native_value() -> impl Strategy<Value = (FieldType, TaggedValue)> {
        prop_oneof![
            any::<String>().prop_map(|s| (FieldType::String, TaggedValue::String(s))),
            any::<i64>().prop_map(|n| (FieldType::Integer, TaggedValue::Integer(n))),
            any::<bool>().prop_map(|b| (FieldType::Bool, TaggedValue::Bool(b))),
            (-1.0e12f64..1.0e12).prop_map(|d| (FieldType::Double, TaggedValue::Double(d))),
            (-1.0e6f32..1.0e6).prop_map(|f| (FieldType::Float, TaggedValue::Float(f))),
            (0i64..2_000_000_000_000_000).prop_map(|micros| (
                FieldType::Date,
                TaggedValue::Date(DateTime::from_timestamp_micros(micros).unwrap())
            )),
            proptest::collection::vec("[a-z]{1,8}", 0..5)
                .prop_map(|items| (FieldType::StringArray, TaggedValue::StringArray(items))),
            proptest::collection::btree_set("[a-z0-9]{1,8}", 0..5)
                .prop_map(|set| (FieldType::Relation, TaggedValue::Relation(set))),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode((field_type, value) in native_value()) {
            let stored = encode("field", &value);
            let decoded = decode("field", field_type, stored.as_ref());
            prop_assert_eq!(decoded, value);
        }
    }
}
