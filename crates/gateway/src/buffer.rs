//! Typed payload buffers and their wire marshaling.
//!
//! A call arrives from the bus carrying a [`PayloadBuffer`] in one of five
//! formats. The buffer adapter in this module converts each format to the
//! bytes sent to the backend ([`serialize`]) and converts a backend response
//! body back into a buffer of a given format ([`deserialize`]).
//!
//! ## Wire shapes
//!
//! | Format | Outbound body | Content type |
//! |--------|---------------|--------------|
//! | [`BufferFormat::StructuredRecord`] | flat JSON object, one key per field | `application/json` |
//! | [`BufferFormat::ViewRecord`] | `{"<VIEW>": { fields }}` | `application/json` |
//! | [`BufferFormat::PlainString`] | the string, UTF-8 | `text/plain` |
//! | [`BufferFormat::JsonDocument`] | the document text | `application/json` |
//! | [`BufferFormat::BinaryBlob`] | the bytes, unchanged | `application/octet-stream` |
//!
//! Record fields may occur more than once. A single occurrence is written as a
//! JSON scalar, several occurrences as a JSON array. Only numbers and strings
//! are representable.
//!
//! All record maps are ordered, so serializing the same record twice yields
//! byte-identical output.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::{ContentType, ErrorMode, FormatError};

/// Reserved structured-record field carrying the backend's error code.
pub const RESERVED_CODE_FIELD: &str = "EX_IF_ECODE";

/// Reserved structured-record field carrying the backend's error message.
pub const RESERVED_MESSAGE_FIELD: &str = "EX_IF_EMSG";

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// The variant tag of a [`PayloadBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    /// Self-describing field buffer (name → occurrences).
    StructuredRecord,
    /// Named, schema-bound record.
    ViewRecord,
    /// Text string.
    PlainString,
    /// JSON document text.
    JsonDocument,
    /// Opaque bytes.
    BinaryBlob,
}

impl BufferFormat {
    /// Error modes that may be configured for services receiving this format.
    ///
    /// Record formats can only carry their error envelope in their own reserved
    /// fields (or not at all, in HTTP mode); unstructured formats cannot be
    /// parsed into records.
    pub fn allowed_error_modes(self) -> &'static [ErrorMode] {
        match self {
            Self::StructuredRecord => &[ErrorMode::Http, ErrorMode::Json2Struct],
            Self::ViewRecord => &[ErrorMode::Http, ErrorMode::Json2View],
            Self::PlainString | Self::JsonDocument | Self::BinaryBlob => {
                &[ErrorMode::Http, ErrorMode::Json, ErrorMode::Text]
            }
        }
    }

    /// Returns `true` if `mode` may be used with this format.
    pub fn supports(self, mode: ErrorMode) -> bool {
        self.allowed_error_modes().contains(&mode)
    }

    /// Content type of a request body in this format.
    pub fn content_type(self) -> ContentType {
        match self {
            Self::StructuredRecord | Self::ViewRecord | Self::JsonDocument => ContentType::Json,
            Self::PlainString => ContentType::Text,
            Self::BinaryBlob => ContentType::OctetStream,
        }
    }
}

impl std::fmt::Display for BufferFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::StructuredRecord => "structured",
            Self::ViewRecord => "view",
            Self::PlainString => "string",
            Self::JsonDocument => "json",
            Self::BinaryBlob => "binary",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for BufferFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(Self::StructuredRecord),
            "view" => Ok(Self::ViewRecord),
            "string" => Ok(Self::PlainString),
            "json" => Ok(Self::JsonDocument),
            "binary" => Ok(Self::BinaryBlob),
            other => Err(format!("unknown buffer format '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Record fields
// ---------------------------------------------------------------------------

/// One occurrence of a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Integer value.
    Long(i64),
    /// Floating-point value. Must be finite to be serialized.
    Double(f64),
    /// Text value.
    String(String),
}

impl FieldValue {
    fn from_json(field: &str, value: &Value) -> Result<Self, FormatError> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(v) => Ok(Self::Long(v)),
                None => n.as_f64().map(Self::Double).ok_or_else(|| FormatError::UnsupportedValue {
                    field: field.to_string(),
                    detail: format!("number {n} out of range"),
                }),
            },
            Value::String(s) => Ok(Self::String(s.clone())),
            other => Err(FormatError::UnsupportedValue {
                field: field.to_string(),
                detail: json_kind(other).to_string(),
            }),
        }
    }

    fn to_json(&self, field: &str) -> Result<Value, FormatError> {
        match self {
            Self::Long(v) => Ok(Value::from(*v)),
            Self::Double(v) => Number::from_f64(*v).map(Value::Number).ok_or_else(|| {
                FormatError::UnsupportedValue {
                    field: field.to_string(),
                    detail: format!("non-finite number {v}"),
                }
            }),
            Self::String(s) => Ok(Value::String(s.clone())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "nested array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------

/// An ordered set of record fields, each with one or more occurrences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet(BTreeMap<String, Vec<FieldValue>>);

impl FieldSet {
    /// Creates an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an occurrence of `name`.
    pub fn add(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.entry(name.into()).or_default().push(value);
    }

    /// Replaces the first occurrence of `name`, adding it if absent.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        let occurrences = self.0.entry(name.into()).or_default();
        match occurrences.first_mut() {
            Some(first) => *first = value,
            None => occurrences.push(value),
        }
    }

    /// Returns the first occurrence of `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name).and_then(|occ| occ.first())
    }

    /// Returns every occurrence of `name`.
    pub fn occurrences(&self, name: &str) -> &[FieldValue] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Removes every occurrence of `name`.
    pub fn remove(&mut self, name: &str) -> Option<Vec<FieldValue>> {
        self.0.remove(name)
    }

    /// Returns `true` if the set has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads the first occurrence of `name` as an integer code.
    ///
    /// Integral doubles and decimal strings are converted; anything else is
    /// [`FormatError::InvalidCode`].
    pub fn get_code(&self, name: &str) -> Result<i64, FormatError> {
        match self.get(name) {
            None => Err(FormatError::MissingField(name.to_string())),
            Some(FieldValue::Long(v)) => Ok(*v),
            // `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
            Some(FieldValue::Double(v))
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 =>
            {
                Ok(*v as i64)
            }
            Some(FieldValue::Double(v)) => Err(FormatError::InvalidCode(v.to_string())),
            Some(FieldValue::String(s)) => s
                .parse()
                .map_err(|_| FormatError::InvalidCode(s.clone())),
        }
    }

    /// Reads the first occurrence of `name` as text.
    pub fn get_text(&self, name: &str) -> Result<String, FormatError> {
        match self.get(name) {
            None => Err(FormatError::MissingField(name.to_string())),
            Some(FieldValue::Long(v)) => Ok(v.to_string()),
            Some(FieldValue::Double(v)) => Ok(v.to_string()),
            Some(FieldValue::String(s)) => Ok(s.clone()),
        }
    }

    fn from_json_object(object: &Map<String, Value>) -> Result<Self, FormatError> {
        let mut fields = Self::new();
        for (name, value) in object {
            match value {
                Value::Array(items) => {
                    for item in items {
                        fields.add(name.clone(), FieldValue::from_json(name, item)?);
                    }
                }
                scalar => fields.add(name.clone(), FieldValue::from_json(name, scalar)?),
            }
        }
        Ok(fields)
    }

    fn to_json_object(&self) -> Result<Map<String, Value>, FormatError> {
        let mut object = Map::new();
        for (name, occurrences) in &self.0 {
            let value = match occurrences.as_slice() {
                [] => continue,
                [single] => single.to_json(name)?,
                many => Value::Array(
                    many.iter()
                        .map(|v| v.to_json(name))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            };
            object.insert(name.clone(), value);
        }
        Ok(object)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A self-describing field buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredRecord {
    /// Fields of the record.
    pub fields: FieldSet,
}

impl StructuredRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a record from a flat JSON object.
    pub fn from_json(body: &[u8]) -> Result<Self, FormatError> {
        match serde_json::from_slice::<Value>(body)? {
            Value::Object(object) => Ok(Self {
                fields: FieldSet::from_json_object(&object)?,
            }),
            other => Err(FormatError::MalformedJson(format!(
                "expected an object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Writes the record as a flat JSON object.
    pub fn to_json(&self) -> Result<Vec<u8>, FormatError> {
        Ok(serde_json::to_vec(&Value::Object(self.fields.to_json_object()?))?)
    }
}

// ---------------------------------------------------------------------------

/// A named record bound to a view definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    /// Name of the view definition.
    pub view: String,
    /// Fields of the record.
    pub fields: FieldSet,
}

impl ViewRecord {
    /// Creates a view record with no fields.
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            fields: FieldSet::new(),
        }
    }

    /// Parses a view from `{"<VIEW>": { fields }}`.
    pub fn from_json(body: &[u8]) -> Result<Self, FormatError> {
        let object = match serde_json::from_slice::<Value>(body)? {
            Value::Object(object) => object,
            other => {
                return Err(FormatError::MalformedJson(format!(
                    "expected an object, found {}",
                    json_kind(&other)
                )))
            }
        };
        let mut entries = object.into_iter();
        match (entries.next(), entries.next()) {
            (Some((view, Value::Object(fields))), None) => Ok(Self {
                view,
                fields: FieldSet::from_json_object(&fields)?,
            }),
            (None, _) => Err(FormatError::EmptyObject),
            _ => Err(FormatError::MalformedJson(
                "expected a single view name mapping to an object".to_string(),
            )),
        }
    }

    /// Writes the view as `{"<VIEW>": { fields }}`.
    pub fn to_json(&self) -> Result<Vec<u8>, FormatError> {
        let mut outer = Map::new();
        outer.insert(self.view.clone(), Value::Object(self.fields.to_json_object()?));
        Ok(serde_json::to_vec(&Value::Object(outer))?)
    }

    /// Resets a field to its zero value, keeping it present in the view.
    pub fn reset_field(&mut self, name: &str, zero: FieldValue) {
        self.fields.set(name, zero);
    }
}

// ---------------------------------------------------------------------------
// Payload buffer
// ---------------------------------------------------------------------------

/// The typed payload of one call.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBuffer {
    /// Self-describing field buffer.
    StructuredRecord(StructuredRecord),
    /// Named view record.
    ViewRecord(ViewRecord),
    /// Text string.
    PlainString(String),
    /// JSON document text.
    JsonDocument(String),
    /// Opaque bytes.
    BinaryBlob(Vec<u8>),
}

impl PayloadBuffer {
    /// The variant tag of this buffer.
    pub fn format(&self) -> BufferFormat {
        match self {
            Self::StructuredRecord(_) => BufferFormat::StructuredRecord,
            Self::ViewRecord(_) => BufferFormat::ViewRecord,
            Self::PlainString(_) => BufferFormat::PlainString,
            Self::JsonDocument(_) => BufferFormat::JsonDocument,
            Self::BinaryBlob(_) => BufferFormat::BinaryBlob,
        }
    }

    /// Size of the buffer's wire representation in bytes.
    ///
    /// Records that cannot be serialized report zero.
    pub fn size(&self) -> usize {
        match self {
            Self::PlainString(s) | Self::JsonDocument(s) => s.len(),
            Self::BinaryBlob(b) => b.len(),
            Self::StructuredRecord(_) | Self::ViewRecord(_) => {
                serialize(self).map(|(body, _)| body.len()).unwrap_or(0)
            }
        }
    }
}

/// Converts a buffer into the request body and its content type.
pub fn serialize(buffer: &PayloadBuffer) -> Result<(Vec<u8>, ContentType), FormatError> {
    let body = match buffer {
        PayloadBuffer::StructuredRecord(record) => record.to_json()?,
        PayloadBuffer::ViewRecord(view) => view.to_json()?,
        PayloadBuffer::PlainString(s) | PayloadBuffer::JsonDocument(s) => s.as_bytes().to_vec(),
        PayloadBuffer::BinaryBlob(b) => b.clone(),
    };
    Ok((body, buffer.format().content_type()))
}

/// Builds a buffer of `format` from a response body.
///
/// Text formats require UTF-8; JSON documents are stored as received.
pub fn deserialize(format: BufferFormat, body: &[u8]) -> Result<PayloadBuffer, FormatError> {
    Ok(match format {
        BufferFormat::StructuredRecord => PayloadBuffer::StructuredRecord(StructuredRecord::from_json(body)?),
        BufferFormat::ViewRecord => PayloadBuffer::ViewRecord(ViewRecord::from_json(body)?),
        BufferFormat::PlainString => PayloadBuffer::PlainString(utf8(body)?),
        BufferFormat::JsonDocument => PayloadBuffer::JsonDocument(utf8(body)?),
        BufferFormat::BinaryBlob => PayloadBuffer::BinaryBlob(body.to_vec()),
    })
}

fn utf8(body: &[u8]) -> Result<String, FormatError> {
    String::from_utf8(body.to_vec()).map_err(|_| FormatError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_record_scalars_and_occurrences() {
        let record =
            StructuredRecord::from_json(br#"{"T_LONG":[1,2],"T_STRING":"abc","T_DOUBLE":1.5}"#).unwrap();
        assert_eq!(
            record.fields.occurrences("T_LONG"),
            &[FieldValue::Long(1), FieldValue::Long(2)]
        );
        assert_eq!(record.fields.get("T_STRING"), Some(&FieldValue::String("abc".into())));
        assert_eq!(record.fields.get("T_DOUBLE"), Some(&FieldValue::Double(1.5)));

        // Keys come back sorted; arrays stay arrays.
        let json = String::from_utf8(record.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"T_DOUBLE":1.5,"T_LONG":[1,2],"T_STRING":"abc"}"#);
    }

    #[test]
    fn test_structured_record_rejects_non_object_and_nested_values() {
        assert!(matches!(
            StructuredRecord::from_json(b"[1,2]"),
            Err(FormatError::MalformedJson(_))
        ));
        assert!(matches!(
            StructuredRecord::from_json(br#"{"A":{"B":1}}"#),
            Err(FormatError::UnsupportedValue { .. })
        ));
        assert!(matches!(
            StructuredRecord::from_json(br#"{"A":true}"#),
            Err(FormatError::UnsupportedValue { .. })
        ));
        assert!(matches!(
            StructuredRecord::from_json(b"{not json"),
            Err(FormatError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_non_finite_double_cannot_be_serialized() {
        let mut record = StructuredRecord::new();
        record.fields.add("X", FieldValue::Double(f64::NAN));
        assert!(matches!(record.to_json(), Err(FormatError::UnsupportedValue { .. })));
        assert_eq!(PayloadBuffer::StructuredRecord(record).size(), 0);
    }

    #[test]
    fn test_view_record_shape() {
        let view = ViewRecord::from_json(br#"{"ACCOUNT":{"balance":10,"owner":"ann"}}"#).unwrap();
        assert_eq!(view.view, "ACCOUNT");
        assert_eq!(view.fields.get("balance"), Some(&FieldValue::Long(10)));
        assert_eq!(
            view.to_json().unwrap(),
            br#"{"ACCOUNT":{"balance":10,"owner":"ann"}}"#.to_vec()
        );
    }

    #[test]
    fn test_view_record_rejects_empty_and_multiple_views() {
        assert_eq!(ViewRecord::from_json(b"{}"), Err(FormatError::EmptyObject));
        assert!(matches!(
            ViewRecord::from_json(br#"{"A":{},"B":{}}"#),
            Err(FormatError::MalformedJson(_))
        ));
        assert!(matches!(
            ViewRecord::from_json(br#"{"A":1}"#),
            Err(FormatError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_codes_are_read_from_longs_doubles_and_strings() {
        let mut fields = FieldSet::new();
        fields.add("A", FieldValue::Long(4));
        fields.add("B", FieldValue::Double(6.0));
        fields.add("C", FieldValue::String("13".into()));
        fields.add("D", FieldValue::String("x".into()));
        fields.add("E", FieldValue::Double(1.25));
        assert_eq!(fields.get_code("A"), Ok(4));
        assert_eq!(fields.get_code("B"), Ok(6));
        assert_eq!(fields.get_code("C"), Ok(13));
        assert_eq!(fields.get_code("D"), Err(FormatError::InvalidCode("x".into())));
        assert_eq!(fields.get_code("E"), Err(FormatError::InvalidCode("1.25".into())));
        assert_eq!(fields.get_code("Z"), Err(FormatError::MissingField("Z".into())));
    }

    #[test]
    fn test_out_of_range_double_code_is_invalid() {
        let mut fields = FieldSet::new();
        fields.add("BIG", FieldValue::Double(1e30));
        fields.add("SMALL", FieldValue::Double(-1e30));
        fields.add("EDGE", FieldValue::Double(9_223_372_036_854_775_808.0));
        fields.add("INF", FieldValue::Double(f64::INFINITY));
        fields.add("NEG", FieldValue::Double(-4.0));
        assert!(matches!(fields.get_code("BIG"), Err(FormatError::InvalidCode(_))));
        assert!(matches!(fields.get_code("SMALL"), Err(FormatError::InvalidCode(_))));
        assert!(matches!(fields.get_code("EDGE"), Err(FormatError::InvalidCode(_))));
        assert!(matches!(fields.get_code("INF"), Err(FormatError::InvalidCode(_))));
        assert_eq!(fields.get_code("NEG"), Ok(-4));
    }

    #[test]
    fn test_set_replaces_first_occurrence() {
        let mut fields = FieldSet::new();
        fields.add("A", FieldValue::Long(1));
        fields.add("A", FieldValue::Long(2));
        fields.set("A", FieldValue::Long(0));
        assert_eq!(fields.occurrences("A"), &[FieldValue::Long(0), FieldValue::Long(2)]);
    }

    #[test]
    fn test_serialize_content_types() {
        let cases = [
            (PayloadBuffer::StructuredRecord(StructuredRecord::new()), "application/json"),
            (PayloadBuffer::ViewRecord(ViewRecord::new("V")), "application/json"),
            (PayloadBuffer::PlainString("hi".into()), "text/plain"),
            (PayloadBuffer::JsonDocument("{}".into()), "application/json"),
            (PayloadBuffer::BinaryBlob(vec![0, 1]), "application/octet-stream"),
        ];
        for (buffer, expected) in cases {
            let (_, content_type) = serialize(&buffer).unwrap();
            assert_eq!(content_type.as_str(), expected, "{:?}", buffer.format());
        }
    }

    #[test]
    fn test_deserialize_text_requires_utf8_but_binary_does_not() {
        let invalid = [0xff, 0xfe];
        assert_eq!(
            deserialize(BufferFormat::PlainString, &invalid),
            Err(FormatError::InvalidUtf8)
        );
        assert_eq!(
            deserialize(BufferFormat::BinaryBlob, &invalid),
            Ok(PayloadBuffer::BinaryBlob(invalid.to_vec()))
        );
    }

    #[test]
    fn test_compatibility_matrix() {
        use ErrorMode::*;
        assert!(BufferFormat::StructuredRecord.supports(Json2Struct));
        assert!(!BufferFormat::StructuredRecord.supports(Json2View));
        assert!(!BufferFormat::StructuredRecord.supports(Text));
        assert!(BufferFormat::ViewRecord.supports(Json2View));
        assert!(!BufferFormat::ViewRecord.supports(Json2Struct));
        for format in [
            BufferFormat::PlainString,
            BufferFormat::JsonDocument,
            BufferFormat::BinaryBlob,
        ] {
            assert!(format.supports(Http));
            assert!(format.supports(Json));
            assert!(format.supports(Text));
            assert!(!format.supports(Json2Struct));
            assert!(!format.supports(Json2View));
        }
    }

    #[test]
    fn test_format_names_parse_back() {
        for format in [
            BufferFormat::StructuredRecord,
            BufferFormat::ViewRecord,
            BufferFormat::PlainString,
            BufferFormat::JsonDocument,
            BufferFormat::BinaryBlob,
        ] {
            assert_eq!(format.to_string().parse::<BufferFormat>(), Ok(format));
        }
    }
}
