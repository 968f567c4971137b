//! Conversion of decoded values into Rust types.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use bytes::Bytes;

use crate::error::{AmfError, Result};
use crate::graph::{AmfGraph, AmfNode};
use crate::value::AmfValue;

/// Types that can be extracted from a decoded value.
pub trait FromAmf: Sized {
    /// Converts `value`, following references through `graph`.
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self>;
}

fn unexpected(expected: &'static str, graph: &AmfGraph, value: &AmfValue) -> AmfError {
    let got = match graph.resolve(value) {
        Some(node) => node.kind(),
        None => value.kind(),
    };

    AmfError::UnexpectedType { expected, got }
}

impl FromAmf for AmfValue {
    fn from_amf(_: &AmfGraph, value: &AmfValue) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromAmf for bool {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        value.as_bool().ok_or_else(|| unexpected("boolean", graph, value))
    }
}

impl FromAmf for String {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        value
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| unexpected("string", graph, value))
    }
}

impl FromAmf for f64 {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        value.as_f64().ok_or_else(|| unexpected("number", graph, value))
    }
}

impl FromAmf for f32 {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        f64::from_amf(graph, value).map(|n| n as f32)
    }
}

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl FromAmf for $ty {
                fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
                    let coercion = |value: f64| AmfError::NumberCoercion {
                        value,
                        target: stringify!($ty),
                    };

                    match value {
                        AmfValue::Integer(i) => <$ty>::try_from(*i).map_err(|_| coercion(f64::from(*i))),
                        AmfValue::Number(n) => {
                            if n.fract() == 0.0 && *n >= <$ty>::MIN as f64 && *n <= <$ty>::MAX as f64 {
                                Ok(*n as $ty)
                            } else {
                                Err(coercion(*n))
                            }
                        }
                        _ => Err(unexpected("number", graph, value)),
                    }
                }
            }
        )*
    };
}

impl_integer!(i32, i64, u32, u16, u8);

impl FromAmf for Bytes {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        match graph.resolve(value) {
            Some(AmfNode::ByteArray(bytes)) => Ok(bytes.clone()),
            _ => Err(unexpected("byte array", graph, value)),
        }
    }
}

impl<T: FromAmf> FromAmf for Option<T> {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        if value.is_nullish() {
            Ok(None)
        } else {
            T::from_amf(graph, value).map(Some)
        }
    }
}

/// The elements of any list-like node.
fn elements(graph: &AmfGraph, value: &AmfValue) -> Result<Vec<AmfValue>> {
    match graph.resolve(value) {
        Some(AmfNode::Array(array)) => Ok(array.dense.clone()),
        Some(AmfNode::EcmaArray(map)) if map.is_list() => Ok(map.iter().map(|(_, v)| v.clone()).collect()),
        Some(AmfNode::VectorInt(vector)) => Ok(vector.items.iter().copied().map(AmfValue::Integer).collect()),
        Some(AmfNode::VectorUInt(vector)) => Ok(vector.items.iter().map(|v| AmfValue::Number(f64::from(*v))).collect()),
        Some(AmfNode::VectorNumber(vector)) => Ok(vector.items.iter().copied().map(AmfValue::Number).collect()),
        Some(AmfNode::VectorObject(vector)) => Ok(vector.items.clone()),
        _ => Err(unexpected("list", graph, value)),
    }
}

/// The named entries of any map-like node.
fn entries(graph: &AmfGraph, value: &AmfValue) -> Result<Vec<(String, AmfValue)>> {
    match graph.resolve(value) {
        Some(AmfNode::Object(object)) => Ok(object.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect()),
        Some(AmfNode::EcmaArray(map)) => Ok(map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()),
        Some(AmfNode::Array(array)) => Ok(array
            .dense
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .chain(array.assoc.iter().cloned())
            .collect()),
        Some(AmfNode::Instance(instance)) => Ok(instance
            .traits()
            .sealed
            .into_iter()
            .filter_map(|name| instance.get_property(&name).map(|v| (name, v)))
            .collect()),
        _ => Err(unexpected("map", graph, value)),
    }
}

impl<T: FromAmf> FromAmf for Vec<T> {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        elements(graph, value)?.iter().map(|v| T::from_amf(graph, v)).collect()
    }
}

impl<T: FromAmf + Eq + Hash> FromAmf for HashSet<T> {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        elements(graph, value)?.iter().map(|v| T::from_amf(graph, v)).collect()
    }
}

impl<T: FromAmf + Ord> FromAmf for BTreeSet<T> {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        elements(graph, value)?.iter().map(|v| T::from_amf(graph, v)).collect()
    }
}

impl<T: FromAmf> FromAmf for HashMap<String, T> {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        entries(graph, value)?
            .into_iter()
            .map(|(k, v)| T::from_amf(graph, &v).map(|v| (k, v)))
            .collect()
    }
}

impl<T: FromAmf> FromAmf for BTreeMap<String, T> {
    fn from_amf(graph: &AmfGraph, value: &AmfValue) -> Result<Self> {
        entries(graph, value)?
            .into_iter()
            .map(|(k, v)| T::from_amf(graph, &v).map(|v| (k, v)))
            .collect()
    }
}
