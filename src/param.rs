//! Parameter value formatting: the Format and Style stages of C2.
//!
//! The Format stage (`Format::encode_scalar`/`encode_bytes`) turns a raw
//! [`crate::reflect::Value`] into formatted bytes. The Style stage
//! (`path_str`, `query_or_header_pairs`, `body_str`) turns the formatted
//! value into its on-the-wire rendering for a given parameter location.
//! These are pure functions of already-resolved values; the `"*"` whole-body
//! sentinel is handled by the engine (C7), not here.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;

use crate::error::{ClientError, Result};
use crate::reflect::Value;

/// A scalar value, tagged with its native width so big-endian/hex encodings
/// are byte-exact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// 8-bit signed integer.
    I8(i8),
    /// 16-bit signed integer.
    I16(i16),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 8-bit unsigned integer.
    U8(u8),
    /// 16-bit unsigned integer.
    U16(u16),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Boolean, rendered as `1`/`0` by every format.
    Bool(bool),
}

/// String scalars are kept separate from [`Scalar`] because they never
/// participate in big-endian byte-image conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Str(pub String);

/// The wire format a value is converted to before a [`Style`] is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Decimal for numbers, strings pass through, `1`/`0` for booleans.
    String,
    /// Lowercase hex. Signed integers get a sign prefix and bare magnitude;
    /// unsigned integers and byte sequences are bare lowercase hex pairs.
    Hex,
    /// Standard base64 alphabet, `=`-padded.
    Base64,
    /// URL-safe base64 alphabet, unpadded.
    Base64url,
    /// Raw bytes (numbers are first converted to a big-endian byte image).
    Binary,
}

/// The RFC 6570-derived rendering convention for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// `v` / `a,b,c` (path only).
    Simple,
    /// `.v` / `.a,b,c` or `.a.b.c` when exploded (path only).
    Label,
    /// `;id=v` / `;id=a,b,c` or `;id=a;id=b;id=c` when exploded (path only).
    Matrix,
    /// One or more `(name, value)` pairs (query or header only).
    Form,
}

/// A value after the Format stage has run: either a single formatted byte
/// string, a homogeneous array of formatted strings, or an already-string
/// ordered object (the source never runs an object's values back through
/// `Format`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormattedValue {
    /// A scalar or byte blob, formatted to bytes. Valid UTF-8 for every
    /// format except `Binary`, which is only ever used for whole-request
    /// bodies (never path/query/header placement).
    Single(Vec<u8>),
    /// A homogeneous array of formatted scalars.
    Array(Vec<String>),
    /// An ordered string-to-string object, iterated in lexical key order.
    Object(BTreeMap<String, String>),
}

impl Format {
    /// Runs the Format stage on a scalar.
    pub fn encode_scalar(&self, s: &Scalar) -> Vec<u8> {
        match self {
            Format::String => Self::string_format(s).into_bytes(),
            Format::Hex => Self::hex_format(s).into_bytes(),
            Format::Base64 => STANDARD.encode(Self::be_bytes(s)).into_bytes(),
            Format::Base64url => URL_SAFE_NO_PAD.encode(Self::be_bytes(s)).into_bytes(),
            Format::Binary => Self::be_bytes(s),
        }
    }

    /// Runs the Format stage on a string scalar.
    pub fn encode_str(&self, s: &Str) -> Vec<u8> {
        match self {
            Format::String | Format::Binary => s.0.clone().into_bytes(),
            Format::Hex => hex::encode(s.0.as_bytes()).into_bytes(),
            Format::Base64 => STANDARD.encode(s.0.as_bytes()).into_bytes(),
            Format::Base64url => URL_SAFE_NO_PAD.encode(s.0.as_bytes()).into_bytes(),
        }
    }

    /// Runs the Format stage on a raw byte blob.
    pub fn encode_bytes(&self, b: &[u8]) -> Vec<u8> {
        match self {
            Format::String | Format::Binary => b.to_vec(),
            Format::Hex => hex::encode(b).into_bytes(),
            Format::Base64 => STANDARD.encode(b).into_bytes(),
            Format::Base64url => URL_SAFE_NO_PAD.encode(b).into_bytes(),
        }
    }

    fn string_format(s: &Scalar) -> String {
        match s {
            Scalar::I8(v) => v.to_string(),
            Scalar::I16(v) => v.to_string(),
            Scalar::I32(v) => v.to_string(),
            Scalar::I64(v) => v.to_string(),
            Scalar::U8(v) => v.to_string(),
            Scalar::U16(v) => v.to_string(),
            Scalar::U32(v) => v.to_string(),
            Scalar::U64(v) => v.to_string(),
            Scalar::F32(v) => format!("{v:.6}"),
            Scalar::F64(v) => format!("{v:.6}"),
            Scalar::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        }
    }

    fn hex_format(s: &Scalar) -> String {
        match s {
            Scalar::I8(v) => Self::signed_hex(*v as i64),
            Scalar::I16(v) => Self::signed_hex(*v as i64),
            Scalar::I32(v) => Self::signed_hex(*v as i64),
            Scalar::I64(v) => Self::signed_hex(*v),
            Scalar::U8(v) => format!("{v:x}"),
            Scalar::U16(v) => format!("{v:x}"),
            Scalar::U32(v) => format!("{v:x}"),
            Scalar::U64(v) => format!("{v:x}"),
            Scalar::F32(v) => hex::encode(v.to_be_bytes()),
            Scalar::F64(v) => hex::encode(v.to_be_bytes()),
            Scalar::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        }
    }

    fn signed_hex(v: i64) -> String {
        if v < 0 {
            format!("-{:x}", v.unsigned_abs())
        } else {
            format!("{v:x}")
        }
    }

    fn be_bytes(s: &Scalar) -> Vec<u8> {
        match s {
            Scalar::I8(v) => v.to_be_bytes().to_vec(),
            Scalar::I16(v) => v.to_be_bytes().to_vec(),
            Scalar::I32(v) => v.to_be_bytes().to_vec(),
            Scalar::I64(v) => v.to_be_bytes().to_vec(),
            Scalar::U8(v) => v.to_be_bytes().to_vec(),
            Scalar::U16(v) => v.to_be_bytes().to_vec(),
            Scalar::U32(v) => v.to_be_bytes().to_vec(),
            Scalar::U64(v) => v.to_be_bytes().to_vec(),
            Scalar::F32(v) => v.to_be_bytes().to_vec(),
            Scalar::F64(v) => v.to_be_bytes().to_vec(),
            Scalar::Bool(v) => vec![u8::from(*v)],
        }
    }
}

/// Runs the Format stage on a resolved [`Value`], producing the value shape
/// the Style stage operates on. Object values are never re-formatted — the
/// reflective request is expected to hand back already-stringified entries,
/// matching the source's `std::map<std::string, std::string>` parameter kind.
pub fn format_value(format: Format, value: &Value) -> FormattedValue {
    match value {
        Value::Scalar(s) => FormattedValue::Single(format.encode_scalar(s)),
        Value::Str(s) => FormattedValue::Single(format.encode_str(s)),
        Value::Bytes(b) => FormattedValue::Single(format.encode_bytes(b)),
        Value::Array(items) => FormattedValue::Array(
            items
                .iter()
                .map(|s| String::from_utf8_lossy(&format.encode_scalar(s)).into_owned())
                .collect(),
        ),
        Value::StrArray(items) => FormattedValue::Array(
            items
                .iter()
                .map(|s| String::from_utf8_lossy(&format.encode_str(&Str(s.clone()))).into_owned())
                .collect(),
        ),
        Value::Object(map) => FormattedValue::Object(map.clone()),
    }
}

fn join_map(map: &BTreeMap<String, String>, kv_sep: &str, pair_sep: &str) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}{kv_sep}{v}"))
        .collect::<Vec<_>>()
        .join(pair_sep)
}

/// Style stage for path-located parameters (Simple, Label, Matrix). `Form`
/// is not a valid path style and falls back to `default_value`, matching
/// the source's unsupported-combination behavior.
pub fn path_str(value: &FormattedValue, ident: &str, style: Style, explode: bool, default_value: &str) -> String {
    match value {
        FormattedValue::Single(bytes) => {
            let v = String::from_utf8_lossy(bytes);
            match style {
                Style::Simple => v.into_owned(),
                Style::Label => format!(".{v}"),
                Style::Matrix => format!(";{ident}={v}"),
                Style::Form => default_value.to_string(),
            }
        }
        FormattedValue::Array(items) => match style {
            Style::Simple => items.join(","),
            Style::Label => {
                if explode {
                    format!(".{}", items.join("."))
                } else {
                    format!(".{}", items.join(","))
                }
            }
            Style::Matrix => {
                if explode {
                    format!(
                        ";{}",
                        items
                            .iter()
                            .map(|i| format!("{ident}={i}"))
                            .collect::<Vec<_>>()
                            .join(";")
                    )
                } else {
                    format!(";{ident}={}", items.join(","))
                }
            }
            Style::Form => default_value.to_string(),
        },
        FormattedValue::Object(map) => match style {
            Style::Simple => {
                if explode {
                    join_map(map, "=", ",")
                } else {
                    join_map(map, ",", ",")
                }
            }
            Style::Label => {
                if explode {
                    format!(".{}", join_map(map, "=", "."))
                } else {
                    format!(".{}", join_map(map, ",", ","))
                }
            }
            Style::Matrix => {
                if explode {
                    format!(";{}", join_map(map, "=", ";"))
                } else {
                    format!(";{ident}={}", join_map(map, ",", ","))
                }
            }
            Style::Form => default_value.to_string(),
        },
    }
}

/// Style stage for query- or header-located parameters (Form only — any
/// other style yields no pairs). `is_header` forces `explode` off: header
/// values are always comma-joined into a single pair regardless of the
/// descriptor's explode flag.
pub fn query_or_header_pairs(
    value: &FormattedValue,
    ident: &str,
    style: Style,
    explode: bool,
    is_header: bool,
) -> Vec<(String, String)> {
    let explode = explode && !is_header;

    match value {
        FormattedValue::Single(bytes) => {
            let v = String::from_utf8_lossy(bytes).into_owned();
            match style {
                Style::Form => vec![(ident.to_string(), v)],
                _ => vec![],
            }
        }
        FormattedValue::Array(items) => match style {
            Style::Form => {
                if explode {
                    items.iter().map(|i| (ident.to_string(), i.clone())).collect()
                } else {
                    vec![(ident.to_string(), items.join(","))]
                }
            }
            _ => vec![],
        },
        FormattedValue::Object(map) => match style {
            Style::Form => {
                if explode {
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                } else {
                    vec![(ident.to_string(), join_map(map, ",", ","))]
                }
            }
            _ => vec![],
        },
    }
}

/// Extracts a request body from a formatted value. Only scalar/byte-blob
/// (`Single`) values are valid request bodies.
pub fn body_str(value: &FormattedValue) -> Result<Vec<u8>> {
    match value {
        FormattedValue::Single(bytes) => Ok(bytes.clone()),
        FormattedValue::Array(_) => Err(ClientError::SpecLoad(
            "expected parameter value of type scalar, got array".to_string(),
        )),
        FormattedValue::Object(_) => Err(ClientError::SpecLoad(
            "expected parameter value of type scalar, got object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn format_value_handles_string_arrays() {
        let value = Value::StrArray(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let formatted = format_value(Format::String, &value);
        assert_eq!(
            formatted,
            FormattedValue::Array(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn hex_of_signed_negative() {
        assert_eq!(Format::Hex.encode_scalar(&Scalar::I32(-42)), b"-2a");
    }

    #[test]
    fn hex_of_unsigned() {
        assert_eq!(Format::Hex.encode_scalar(&Scalar::U32(255)), b"ff");
    }

    #[test]
    fn hex_of_bytes() {
        assert_eq!(
            Format::Hex.encode_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]),
            b"deadbeef"
        );
    }

    #[test]
    fn base64_of_string() {
        assert_eq!(
            Format::Base64.encode_str(&Str("Test String".to_string())),
            b"VGVzdCBTdHJpbmc="
        );
    }

    #[test]
    fn base64url_of_string_has_no_padding() {
        assert_eq!(
            Format::Base64url.encode_str(&Str("Test String".to_string())),
            b"VGVzdCBTdHJpbmc"
        );
    }

    #[test]
    fn base64url_of_int_big_endian_image() {
        assert_eq!(Format::Base64url.encode_scalar(&Scalar::I32(5)), b"AAAABQ");
    }

    #[test]
    fn binary_of_int_is_big_endian_bytes() {
        assert_eq!(
            Format::Binary.encode_scalar(&Scalar::I32(5)),
            vec![0u8, 0, 0, 5]
        );
    }

    #[test]
    fn path_style_table() {
        let single = FormattedValue::Single(b"hello".to_vec());
        assert_eq!(path_str(&single, "p", Style::Simple, false, ""), "hello");
        assert_eq!(path_str(&single, "p", Style::Label, false, ""), ".hello");
        assert_eq!(path_str(&single, "id", Style::Matrix, false, ""), ";id=hello");

        let array = FormattedValue::Array(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(path_str(&array, "p", Style::Simple, false, ""), "a,b,c");
        assert_eq!(path_str(&array, "p", Style::Simple, true, ""), "a,b,c");
        assert_eq!(path_str(&array, "p", Style::Label, false, ""), ".a,b,c");
        assert_eq!(path_str(&array, "p", Style::Label, true, ""), ".a.b.c");
        assert_eq!(
            path_str(&array, "matrix-arr", Style::Matrix, false, ""),
            ";matrix-arr=a,b,c"
        );
        assert_eq!(
            path_str(&array, "matrix-arr", Style::Matrix, true, ""),
            ";matrix-arr=a;matrix-arr=b;matrix-arr=c"
        );

        let object = FormattedValue::Object(obj(&[("k1", "v1"), ("k2", "v2")]));
        assert_eq!(
            path_str(&object, "id", Style::Simple, false, ""),
            "k1,v1,k2,v2"
        );
        assert_eq!(path_str(&object, "id", Style::Simple, true, ""), "k1=v1,k2=v2");
        assert_eq!(
            path_str(&object, "id", Style::Label, false, ""),
            ".k1,v1,k2,v2"
        );
        assert_eq!(path_str(&object, "id", Style::Label, true, ""), ".k1=v1.k2=v2");
        assert_eq!(
            path_str(&object, "id", Style::Matrix, false, ""),
            ";id=k1,v1,k2,v2"
        );
        assert_eq!(path_str(&object, "id", Style::Matrix, true, ""), ";k1=v1;k2=v2");
    }

    #[test]
    fn form_style_is_unsupported_in_path() {
        let single = FormattedValue::Single(b"hello".to_vec());
        assert_eq!(path_str(&single, "p", Style::Form, false, "fallback"), "fallback");
    }

    #[test]
    fn query_pairs_table() {
        let single = FormattedValue::Single(b"v".to_vec());
        assert_eq!(
            query_or_header_pairs(&single, "id", Style::Form, false, false),
            vec![("id".to_string(), "v".to_string())]
        );

        let array = FormattedValue::Array(vec!["1".into(), "2".into(), "3".into()]);
        assert_eq!(
            query_or_header_pairs(&array, "id", Style::Form, true, false),
            vec![
                ("id".to_string(), "1".to_string()),
                ("id".to_string(), "2".to_string()),
                ("id".to_string(), "3".to_string())
            ]
        );
        assert_eq!(
            query_or_header_pairs(&array, "id", Style::Form, false, false),
            vec![("id".to_string(), "1,2,3".to_string())]
        );
    }

    #[test]
    fn header_ignores_explode_and_always_joins() {
        let array = FormattedValue::Array(vec!["1".into(), "2".into(), "3".into()]);
        assert_eq!(
            query_or_header_pairs(&array, "id", Style::Form, true, true),
            vec![("id".to_string(), "1,2,3".to_string())]
        );

        let object = FormattedValue::Object(obj(&[("k1", "v1"), ("k2", "v2")]));
        assert_eq!(
            query_or_header_pairs(&object, "id", Style::Form, true, true),
            vec![("id".to_string(), "k1,v1,k2,v2".to_string())]
        );
    }

    #[test]
    fn unsupported_style_yields_no_pairs() {
        let single = FormattedValue::Single(b"v".to_vec());
        assert!(query_or_header_pairs(&single, "id", Style::Simple, false, false).is_empty());
    }
}
