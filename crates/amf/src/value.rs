//! AMF values.
//!
//! Scalars are stored inline. Everything that takes part in reference tables
//! (objects, arrays, byte arrays and vectors) lives in an
//! [`AmfGraph`](crate::AmfGraph) and is referred to by [`AmfValue::Ref`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::graph::NodeId;

/// A single AMF value.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean.
    Boolean(bool),
    /// A double precision number.
    Number(f64),
    /// An AMF3 29-bit integer.
    Integer(i32),
    /// A UTF-8 string.
    String(String),
    /// Milliseconds since the unix epoch.
    Date(f64),
    /// A legacy XML document.
    XmlDocument(String),
    /// An E4X XML value (AMF3 only).
    Xml(String),
    /// A composite value stored in the graph.
    Ref(NodeId),
}

impl AmfValue {
    /// Name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::XmlDocument(_) => "xml document",
            Self::Xml(_) => "xml",
            Self::Ref(_) => "reference",
        }
    }

    /// Returns the number for both numeric kinds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Integer(i) => Some(f64::from(*i)),
            _ => None,
        }
    }

    /// Returns the string for the string and XML kinds.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::XmlDocument(s) | Self::Xml(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the graph node this value points at.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }
}

impl From<bool> for AmfValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for AmfValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for AmfValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for AmfValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for AmfValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<NodeId> for AmfValue {
    fn from(value: NodeId) -> Self {
        Self::Ref(value)
    }
}

/// How an AMF3 object lays out its properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraitKind {
    /// Only the sealed properties listed in the traits.
    Sealed,
    /// Sealed properties followed by name/value pairs ending at the empty name.
    Dynamic,
    /// The class reads and writes its own body.
    Externalizable,
    /// Externalizable with the dynamic flag set.
    Proxy,
}

impl TraitKind {
    /// Externalizable or proxy.
    pub fn is_externalizable(self) -> bool {
        matches!(self, Self::Externalizable | Self::Proxy)
    }

    /// Whether the dynamic flag is set on the wire.
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic | Self::Proxy)
    }
}

/// Class name, layout and sealed property names of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitDescriptor {
    /// Class alias, empty for anonymous objects.
    pub class_name: String,
    /// Property layout.
    pub kind: TraitKind,
    /// Sealed property names in wire order.
    pub sealed: Vec<String>,
}

impl TraitDescriptor {
    /// Anonymous dynamic object.
    pub fn anonymous() -> Self {
        Self::dynamic(String::new())
    }

    /// Dynamic object without sealed properties.
    pub fn dynamic(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            kind: TraitKind::Dynamic,
            sealed: Vec::new(),
        }
    }

    /// Object with a fixed set of properties.
    pub fn sealed<I, S>(class_name: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            class_name: class_name.into(),
            kind: TraitKind::Sealed,
            sealed: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Externalizable object.
    pub fn externalizable(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            kind: TraitKind::Externalizable,
            sealed: Vec::new(),
        }
    }

    /// Whether the class name is empty.
    pub fn is_anonymous(&self) -> bool {
        self.class_name.is_empty()
    }
}

/// An object with ordered properties.
///
/// Sealed properties are looked up by name when encoding, any other
/// property is written to the dynamic section.
#[derive(Debug, Clone, PartialEq)]
pub struct AmfObject {
    traits: Arc<TraitDescriptor>,
    properties: Vec<(String, AmfValue)>,
}

impl Default for AmfObject {
    fn default() -> Self {
        Self::new()
    }
}

impl AmfObject {
    /// Anonymous dynamic object.
    pub fn new() -> Self {
        Self::with_traits(Arc::new(TraitDescriptor::anonymous()))
    }

    /// Dynamic object with a class name.
    pub fn typed(class_name: impl Into<String>) -> Self {
        Self::with_traits(Arc::new(TraitDescriptor::dynamic(class_name)))
    }

    /// Empty object with the given traits.
    pub fn with_traits(traits: Arc<TraitDescriptor>) -> Self {
        Self {
            traits,
            properties: Vec::new(),
        }
    }

    /// Object from traits and properties.
    pub fn from_parts(traits: Arc<TraitDescriptor>, properties: Vec<(String, AmfValue)>) -> Self {
        Self { traits, properties }
    }

    /// The object's traits.
    pub fn traits(&self) -> &Arc<TraitDescriptor> {
        &self.traits
    }

    /// The class alias.
    pub fn class_name(&self) -> &str {
        &self.traits.class_name
    }

    /// Looks up a property.
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Looks up a property mutably.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut AmfValue> {
        self.properties.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Sets a property, returning the previous value. New properties keep
    /// insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AmfValue>) -> Option<AmfValue> {
        let key = key.into();
        let value = value.into();

        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.properties.push((key, value));
                None
            }
        }
    }

    /// Removes a property.
    pub fn remove(&mut self, key: &str) -> Option<AmfValue> {
        let index = self.properties.iter().position(|(k, _)| k == key)?;
        Some(self.properties.remove(index).1)
    }

    /// Iterates over the properties in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether there are no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Consumes the object, returning its properties.
    pub fn into_properties(self) -> Vec<(String, AmfValue)> {
        self.properties
    }
}

impl<K: Into<String>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfObject {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut object = Self::new();
        for (key, value) in iter {
            object.insert(key, value);
        }
        object
    }
}

/// A list with an optional associative part.
///
/// AMF0 strict arrays only ever fill `dense`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfArray {
    /// Values keyed by position.
    pub dense: Vec<AmfValue>,
    /// Values keyed by name, in wire order.
    pub assoc: Vec<(String, AmfValue)>,
}

impl AmfArray {
    /// Empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the associative part is empty.
    pub fn is_dense(&self) -> bool {
        self.assoc.is_empty()
    }
}

impl From<Vec<AmfValue>> for AmfArray {
    fn from(dense: Vec<AmfValue>) -> Self {
        Self {
            dense,
            assoc: Vec::new(),
        }
    }
}

/// Key of an associative array entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AmfKey {
    /// A key that is a canonical decimal integer.
    Index(u32),
    /// Any other key.
    Name(String),
}

impl AmfKey {
    /// Classifies a wire key. Only canonical decimal strings become indices,
    /// so `"01"` stays a name.
    pub fn parse(key: String) -> Self {
        let canonical = !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) && (key == "0" || !key.starts_with('0'));

        match canonical.then(|| key.parse::<u32>().ok()).flatten() {
            Some(index) => Self::Index(index),
            None => Self::Name(key),
        }
    }

    /// The index, for numeric keys.
    pub fn as_index(&self) -> Option<u32> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for AmfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for AmfKey {
    fn from(value: u32) -> Self {
        Self::Index(value)
    }
}

impl From<&str> for AmfKey {
    fn from(value: &str) -> Self {
        Self::parse(value.to_owned())
    }
}

impl From<String> for AmfKey {
    fn from(value: String) -> Self {
        Self::parse(value)
    }
}

/// An AMF0 associative (ECMA) array whose keys are not a plain list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfMap {
    entries: Vec<(AmfKey, AmfValue)>,
}

impl AmfMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an entry.
    pub fn get(&self, key: &AmfKey) -> Option<&AmfValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Looks up an entry by its wire name.
    pub fn get_str(&self, key: &str) -> Option<&AmfValue> {
        self.get(&AmfKey::from(key))
    }

    /// Sets an entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<AmfKey>, value: impl Into<AmfValue>) -> Option<AmfValue> {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Iterates over the entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&AmfKey, &AmfValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the contiguous run of numeric keys starting at zero.
    ///
    /// This is the count declared in the ECMA array header.
    pub fn dense_len(&self) -> u32 {
        let indices: HashSet<u32> = self.entries.iter().filter_map(|(k, _)| k.as_index()).collect();
        let mut len = 0;
        while indices.contains(&len) {
            len += 1;
        }
        len
    }

    /// Whether the keys are exactly `0..len` in order.
    pub fn is_list(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .enumerate()
                .all(|(i, (k, _))| k.as_index() == Some(i as u32))
    }

    /// Consumes the map, returning its entries.
    pub fn into_entries(self) -> Vec<(AmfKey, AmfValue)> {
        self.entries
    }
}

impl<K: Into<AmfKey>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// An AMF3 vector of numbers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfVector<T> {
    /// Whether the vector has a fixed length.
    pub fixed: bool,
    /// The elements.
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for AmfVector<T> {
    fn from(items: Vec<T>) -> Self {
        Self { fixed: false, items }
    }
}

/// An AMF3 vector of objects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfObjectVector {
    /// Element class name, empty for `Vector.<*>`.
    pub type_name: String,
    /// Whether the vector has a fixed length.
    pub fixed: bool,
    /// The elements.
    pub items: Vec<AmfValue>,
}
