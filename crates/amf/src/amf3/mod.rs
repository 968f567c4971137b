//! AMF3 encoder and decoder.
//!
//! AMF3 keeps three reference tables per session. Strings, trait
//! descriptors and objects (including dates and XML values) are added in the
//! order they first appear and later occurrences refer to them by index.

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::NodeId;
use crate::value::{AmfValue, TraitDescriptor};

mod decoder;
mod encoder;

pub use decoder::Amf3Decoder;
pub use encoder::Amf3Encoder;

/// AMF3 marker types.
///
/// Defined by:
/// - AMF 3 spec, 3.1.
#[derive(Debug, PartialEq, Eq, Clone, Copy, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum Amf3Marker {
    /// undefined-marker
    Undefined = 0x00,
    /// null-marker
    Null = 0x01,
    /// false-marker
    False = 0x02,
    /// true-marker
    True = 0x03,
    /// integer-marker
    Integer = 0x04,
    /// double-marker
    Double = 0x05,
    /// string-marker
    String = 0x06,
    /// xml-doc-marker
    XmlDocument = 0x07,
    /// date-marker
    Date = 0x08,
    /// array-marker
    Array = 0x09,
    /// object-marker
    Object = 0x0a,
    /// xml-marker
    Xml = 0x0b,
    /// byte-array-marker
    ByteArray = 0x0c,
    /// vector-int-marker
    VectorInt = 0x0d,
    /// vector-uint-marker
    VectorUInt = 0x0e,
    /// vector-double-marker
    VectorDouble = 0x0f,
    /// vector-object-marker
    VectorObject = 0x10,
    /// dictionary-marker
    ///
    /// not supported
    Dictionary = 0x11,
}

/// Read side reference tables.
#[derive(Debug, Default)]
pub(crate) struct DecodeTables {
    pub(crate) strings: Vec<String>,
    pub(crate) traits: Vec<Arc<TraitDescriptor>>,
    pub(crate) objects: Vec<AmfValue>,
}

/// Write side reference tables.
#[derive(Debug, Default)]
pub(crate) struct EncodeTables {
    pub(crate) strings: HashMap<String, u32>,
    pub(crate) traits: HashMap<TraitDescriptor, u32>,
    pub(crate) objects: HashMap<NodeId, u32>,
    /// Dates and XML values take object slots on the read side without being
    /// graph nodes, so the next index is tracked separately.
    pub(crate) next_object: u32,
}
