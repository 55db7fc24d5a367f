//! The "reflective request" collaborator.
//!
//! The original implementation resolves parameter values out of a generated
//! request object using language-native runtime reflection. Rust has no
//! equivalent facility, so callers implement [`Introspectable`] for their own
//! generated request types, offering the two capabilities the invocation
//! engine needs: resolving a dotted source path to a typed [`Value`], and
//! producing the whole request as a serialized byte sequence for the `"*"`
//! sentinel.

use std::collections::BTreeMap;

use crate::param::{Scalar, Str};

/// A value resolved from a dotted source path: a scalar, a string, a byte
/// blob, a homogeneous array of scalars, or a string→string map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A width-tagged numeric or boolean scalar.
    Scalar(Scalar),
    /// A UTF-8 string.
    Str(Str),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
    /// Homogeneous array of numeric/bool scalars, mirroring the source's
    /// `std::vector<T>` parameter-value kind.
    Array(Vec<Scalar>),
    /// Homogeneous array of strings — kept distinct from [`Value::Array`]
    /// the same way [`Value::Str`] is kept distinct from [`Value::Scalar`].
    StrArray(Vec<String>),
    /// Ordered string→string map (an "object"), keyed for lexical iteration.
    Object(BTreeMap<String, String>),
}

/// Implemented by generated request types so the invocation engine can pull
/// parameter values out of them without compile-time knowledge of their
/// shape.
pub trait Introspectable {
    /// Resolves `path` (a dotted field path, e.g. `"filter.id"`) to a value.
    /// Returns `None` if the path does not exist on this request.
    fn resolve_field(&self, path: &str) -> Option<Value>;

    /// Serializes the whole request to bytes, for the `"*"` source sentinel
    /// and for whole-request request bodies.
    fn serialize_whole(&self) -> Vec<u8>;
}
