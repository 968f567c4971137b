//! AMF0 encoder

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;

use super::Amf0Marker;
use crate::amf3::{Amf3Encoder, EncodeTables};
use crate::cache::AmfCache;
use crate::error::{AmfError, Result};
use crate::graph::{AmfGraph, AmfNode, NodeId};
use crate::value::{AmfArray, AmfKey, AmfMap, AmfObject, AmfValue};

/// AMF0 encoder.
///
/// Provides various functions to encode different types of AMF0 values into a writer.
/// Composite values are written once per encoder, later occurrences of the same
/// node are written as references.
#[derive(Debug)]
pub struct Amf0Encoder<W> {
    writer: W,
    references: HashMap<NodeId, u16>,
    next_reference: u32,
    amf3: EncodeTables,
    cache: Option<AmfCache>,
    ecma_array_length: bool,
}

impl<W> Amf0Encoder<W> {
    /// Create a new encoder from a writer.
    pub fn new(writer: W) -> Self {
        Amf0Encoder {
            writer,
            references: HashMap::new(),
            next_reference: 0,
            amf3: EncodeTables::default(),
            cache: None,
            ecma_array_length: false,
        }
    }

    /// Memoize encoded strings and trait descriptors in `cache`.
    pub fn with_cache(mut self, cache: AmfCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Append a `length` property to associative arrays that have numeric keys.
    pub fn ecma_array_length(mut self, enabled: bool) -> Self {
        self.ecma_array_length = enabled;
        self
    }

    /// Clears the reference tables.
    pub fn reset_references(&mut self) {
        self.references.clear();
        self.next_reference = 0;
        self.amf3 = EncodeTables::default();
    }

    /// Consumes the encoder, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn encode_string_bytes(value: &str) -> Result<Bytes> {
    let len = value.len();
    let mut out = Vec::with_capacity(len + 5);

    if len <= (u16::MAX as usize) {
        // Normal string
        out.write_u8(Amf0Marker::String as u8)?;
        out.write_u16::<BigEndian>(len as u16)?;
    } else {
        // Long string

        // This try_into fails if the length is greater than u32::MAX
        let len: u32 = len.try_into()?;

        out.write_u8(Amf0Marker::LongString as u8)?;
        out.write_u32::<BigEndian>(len)?;
    }

    out.extend_from_slice(value.as_bytes());
    Ok(Bytes::from(out))
}

impl<W> Amf0Encoder<W>
where
    W: io::Write,
{
    /// Encode a [`bool`] as a AMF0 boolean value.
    pub fn encode_boolean(&mut self, value: bool) -> Result<()> {
        self.writer.write_u8(Amf0Marker::Boolean as u8)?;
        self.writer.write_u8(value as u8)?;
        Ok(())
    }

    /// Encode a [`f64`] as a AMF0 number value.
    pub fn encode_number(&mut self, value: f64) -> Result<()> {
        self.writer.write_u8(Amf0Marker::Number as u8)?;
        self.writer.write_f64::<BigEndian>(value)?;
        Ok(())
    }

    /// Encode a [`&str`](str) as a AMF0 string value.
    ///
    /// This function decides based on the length of the given string slice whether to use a normal string or a long string.
    pub fn encode_string(&mut self, value: &str) -> Result<()> {
        let encoded = match &self.cache {
            Some(cache) => match cache.string(value) {
                Some(encoded) => encoded,
                None => {
                    let encoded = encode_string_bytes(value)?;
                    cache.insert_string(value, encoded.clone());
                    encoded
                }
            },
            None => encode_string_bytes(value)?,
        };

        self.writer.write_all(&encoded)?;
        Ok(())
    }

    /// Encode AMF0 Null value.
    pub fn encode_null(&mut self) -> Result<()> {
        self.writer.write_u8(Amf0Marker::Null as u8)?;
        Ok(())
    }

    /// Encode AMF0 Undefined value.
    pub fn encode_undefined(&mut self) -> Result<()> {
        self.writer.write_u8(Amf0Marker::Undefined as u8)?;
        Ok(())
    }

    /// Encode a date given in milliseconds since the unix epoch.
    ///
    /// The timezone is always written as zero.
    pub fn encode_date(&mut self, millis: f64) -> Result<()> {
        self.writer.write_u8(Amf0Marker::Date as u8)?;
        self.writer.write_f64::<BigEndian>(millis)?;
        self.writer.write_i16::<BigEndian>(0)?;
        Ok(())
    }

    /// Encode an XML document.
    pub fn encode_xml_document(&mut self, value: &str) -> Result<()> {
        self.writer.write_u8(Amf0Marker::XmlDocument as u8)?;
        self.writer.write_u32::<BigEndian>(value.len().try_into()?)?;
        self.writer.write_all(value.as_bytes())?;
        Ok(())
    }

    /// Encode any value, following references into `graph`.
    pub fn encode_value(&mut self, graph: &AmfGraph, value: &AmfValue) -> Result<()> {
        match value {
            AmfValue::Undefined => self.encode_undefined(),
            AmfValue::Null => self.encode_null(),
            AmfValue::Boolean(value) => self.encode_boolean(*value),
            AmfValue::Number(value) => self.encode_number(*value),
            AmfValue::Integer(value) => self.encode_number((*value).into()),
            AmfValue::String(value) => self.encode_string(value),
            AmfValue::Date(value) => self.encode_date(*value),
            AmfValue::XmlDocument(value) | AmfValue::Xml(value) => self.encode_xml_document(value),
            AmfValue::Ref(id) => self.encode_node(graph, *id),
        }
    }

    /// Switch to AMF3 for a single value.
    ///
    /// The AMF3 reference tables are shared by every AVM+ value written by
    /// this encoder.
    pub fn encode_avmplus(&mut self, graph: &AmfGraph, value: &AmfValue) -> Result<()> {
        self.writer.write_u8(Amf0Marker::AVMPlusObject as u8)?;

        let tables = std::mem::take(&mut self.amf3);
        let mut encoder = Amf3Encoder::from_parts(&mut self.writer, tables, self.cache.clone());
        let result = encoder.encode_value(graph, value);
        self.amf3 = encoder.into_tables();

        result
    }

    fn encode_object_key(&mut self, key: &str) -> Result<()> {
        self.writer.write_u16::<BigEndian>(key.len().try_into()?)?;
        self.writer.write_all(key.as_bytes())?;
        Ok(())
    }

    fn encode_object_trailer(&mut self) -> Result<()> {
        self.writer.write_u24::<BigEndian>(Amf0Marker::ObjectEnd as u32)?;
        Ok(())
    }

    fn encode_node(&mut self, graph: &AmfGraph, id: NodeId) -> Result<()> {
        let node = graph.get(id).ok_or(AmfError::InvalidReference {
            table: "graph",
            index: id.index(),
        })?;

        if !matches!(
            node,
            AmfNode::Object(_) | AmfNode::Instance(_) | AmfNode::Array(_) | AmfNode::EcmaArray(_)
        ) {
            return Err(AmfError::UnsupportedType(node.kind()));
        }

        if let Some(index) = self.references.get(&id) {
            self.writer.write_u8(Amf0Marker::Reference as u8)?;
            self.writer.write_u16::<BigEndian>(*index)?;
            return Ok(());
        }

        // The reference table is addressed with 16 bits, later nodes are
        // always written inline.
        if let Ok(index) = u16::try_from(self.next_reference) {
            self.references.insert(id, index);
        }
        self.next_reference = self.next_reference.saturating_add(1);

        match node {
            AmfNode::Object(object) => self.encode_object(graph, object),
            AmfNode::Instance(instance) => {
                let traits = match &self.cache {
                    Some(cache) => cache.traits_for(&**instance),
                    None => Arc::new(instance.traits()),
                };

                if traits.kind.is_externalizable() {
                    return Err(AmfError::UnsupportedType("externalizable object"));
                }

                self.writer.write_u8(Amf0Marker::TypedObject as u8)?;
                self.encode_object_key(&traits.class_name)?;

                for name in &traits.sealed {
                    let value = instance.get_property(name).unwrap_or(AmfValue::Undefined);
                    self.encode_object_key(name)?;
                    self.encode_value(graph, &value)?;
                }

                self.encode_object_trailer()
            }
            AmfNode::Array(array) => self.encode_array(graph, array),
            AmfNode::EcmaArray(map) => self.encode_ecma_array(graph, map),
            other => Err(AmfError::UnsupportedType(other.kind())),
        }
    }

    fn encode_object(&mut self, graph: &AmfGraph, object: &AmfObject) -> Result<()> {
        if object.traits().kind.is_externalizable() {
            return Err(AmfError::UnsupportedType("externalizable object"));
        }

        if object.traits().is_anonymous() {
            self.writer.write_u8(Amf0Marker::Object as u8)?;
        } else {
            self.writer.write_u8(Amf0Marker::TypedObject as u8)?;
            self.encode_object_key(object.class_name())?;
        }

        for (key, value) in object.iter() {
            self.encode_object_key(key)?;
            self.encode_value(graph, value)?;
        }

        self.encode_object_trailer()
    }

    fn encode_array(&mut self, graph: &AmfGraph, array: &AmfArray) -> Result<()> {
        if array.is_dense() {
            self.writer.write_u8(Amf0Marker::StrictArray as u8)?;
            self.writer.write_u32::<BigEndian>(array.dense.len().try_into()?)?;

            for value in &array.dense {
                self.encode_value(graph, value)?;
            }

            return Ok(());
        }

        // A mixed array only fits into an associative array.
        let map: AmfMap = array
            .dense
            .iter()
            .enumerate()
            .map(|(i, v)| (AmfKey::Index(i as u32), v.clone()))
            .chain(array.assoc.iter().map(|(k, v)| (AmfKey::parse(k.clone()), v.clone())))
            .collect();

        self.encode_ecma_array(graph, &map)
    }

    fn encode_ecma_array(&mut self, graph: &AmfGraph, map: &AmfMap) -> Result<()> {
        self.writer.write_u8(Amf0Marker::EcmaArray as u8)?;
        self.writer.write_u32::<BigEndian>(map.dense_len())?;

        let mut has_numeric_keys = false;
        for (key, value) in map.iter() {
            has_numeric_keys |= key.as_index().is_some();
            self.encode_object_key(&key.to_string())?;
            self.encode_value(graph, value)?;
        }

        if self.ecma_array_length && has_numeric_keys && map.get_str("length").is_none() {
            self.encode_object_key("length")?;
            self.encode_number(map.dense_len().into())?;
        }

        self.encode_object_trailer()
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;
    use crate::amf0::Amf0Decoder;
    use crate::class::AmfClass;
    use crate::class::tests::{Person, Point};
    use crate::value::AmfVector;

    fn encode(graph: &AmfGraph, value: &AmfValue) -> Vec<u8> {
        let mut encoder = Amf0Encoder::new(Vec::new());
        encoder.encode_value(graph, value).unwrap();
        encoder.into_inner()
    }

    fn round_trip(graph: &AmfGraph, value: &AmfValue) -> (AmfGraph, AmfValue) {
        let bytes = encode(graph, value);
        let mut decoder = Amf0Decoder::new(bytes.as_slice());
        let value = decoder.decode_value().unwrap();
        assert!(!decoder.has_remaining());
        (decoder.into_graph(), value)
    }

    #[test]
    fn ecma_array_list() {
        let mut graph = AmfGraph::new();
        let map: AmfMap = [(0u32, "hello"), (1, "world")].into_iter().collect();
        let id = graph.insert(map);

        let bytes = encode(&graph, &AmfValue::Ref(id));

        #[rustfmt::skip]
        assert_eq!(
            bytes,
            [
                Amf0Marker::EcmaArray as u8,
                0x00, 0x00, 0x00, 0x02,
                0x00, 0x01, b'0', Amf0Marker::String as u8, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o',
                0x00, 0x01, b'1', Amf0Marker::String as u8, 0x00, 0x05, b'w', b'o', b'r', b'l', b'd',
                0x00, 0x00, Amf0Marker::ObjectEnd as u8,
            ]
        );

        let (graph, value) = round_trip(&graph, &AmfValue::Ref(id));
        let array = graph.array(&value).unwrap();
        assert_eq!(array.dense, [AmfValue::from("hello"), AmfValue::from("world")]);
    }

    #[test]
    fn ecma_array_sparse_keys() {
        let mut graph = AmfGraph::new();
        let map: AmfMap = [(1u32, "hello"), (3, "world")].into_iter().collect();
        let id = graph.insert(map.clone());

        let bytes = encode(&graph, &AmfValue::Ref(id));
        assert_eq!(&bytes[1..5], [0, 0, 0, 0]);

        let (graph, value) = round_trip(&graph, &AmfValue::Ref(id));
        assert_eq!(graph.ecma_array(&value), Some(&map));
    }

    #[test]
    fn ecma_array_length_property() {
        let mut graph = AmfGraph::new();
        let map: AmfMap = [(0u32, 1.0), (1, 2.0)].into_iter().collect();
        let id = graph.insert(map);

        let mut encoder = Amf0Encoder::new(Vec::new()).ecma_array_length(true);
        encoder.encode_value(&graph, &AmfValue::Ref(id)).unwrap();
        let bytes = encoder.into_inner();

        let mut decoder = Amf0Decoder::new(bytes.as_slice());
        let value = decoder.decode_value().unwrap();
        let map = decoder.graph().ecma_array(&value).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get_str("length"), Some(&AmfValue::Number(2.0)));
    }

    #[test]
    fn strings() {
        let graph = AmfGraph::new();

        assert_eq!(encode(&graph, &"hi".into()), [0x02, 0x00, 0x02, b'h', b'i']);

        let short = "a".repeat(65535);
        let bytes = encode(&graph, &short.into());
        assert_eq!(bytes[0], Amf0Marker::String as u8);
        assert_eq!(bytes.len(), 3 + 65535);

        let long = "a".repeat(65536);
        let bytes = encode(&graph, &long.clone().into());
        assert_eq!(&bytes[..5], [Amf0Marker::LongString as u8, 0x00, 0x01, 0x00, 0x00]);

        let (_, value) = round_trip(&graph, &long.clone().into());
        assert_eq!(value, AmfValue::String(long));
    }

    #[test]
    fn cached_strings_encode_identically() {
        let cache = AmfCache::new();
        let mut encoder = Amf0Encoder::new(Vec::new()).with_cache(cache.clone());
        encoder.encode_string("onMetaData").unwrap();
        encoder.encode_string("onMetaData").unwrap();

        assert_eq!(cache.cached_strings(), 1);
        assert_eq!(encoder.into_inner(), b"\x02\x00\x0aonMetaData\x02\x00\x0aonMetaData");
    }

    #[test]
    fn scalars_round_trip() {
        let graph = AmfGraph::new();

        for value in [
            AmfValue::Null,
            AmfValue::Undefined,
            AmfValue::Boolean(true),
            AmfValue::Number(-12.5),
            AmfValue::Date(1_700_000_000_000.0),
            AmfValue::XmlDocument("<a/>".into()),
        ] {
            assert_eq!(round_trip(&graph, &value).1, value);
        }

        assert_eq!(round_trip(&graph, &AmfValue::Integer(3)).1, AmfValue::Number(3.0));
    }

    #[test]
    fn cyclic_object() {
        let mut graph = AmfGraph::new();
        let id = graph.insert(AmfObject::typed("com.example.Node"));
        if let Some(AmfNode::Object(object)) = graph.get_mut(id) {
            object.insert("name", "root");
            object.insert("self", AmfValue::Ref(id));
        }

        let bytes = encode(&graph, &AmfValue::Ref(id));
        assert_eq!(&bytes[bytes.len() - 6..], [Amf0Marker::Reference as u8, 0x00, 0x00, 0x00, 0x00, 0x09]);

        let (graph, value) = round_trip(&graph, &AmfValue::Ref(id));
        let object = graph.object(&value).unwrap();
        assert_eq!(object.class_name(), "com.example.Node");
        assert_eq!(object.get("self"), Some(&value));
    }

    #[test]
    fn shared_node_is_referenced() {
        let mut graph = AmfGraph::new();
        let shared = graph.insert(AmfObject::new());
        let list = graph.insert(AmfArray::from(vec![AmfValue::Ref(shared), AmfValue::Ref(shared)]));

        #[rustfmt::skip]
        assert_eq!(
            encode(&graph, &AmfValue::Ref(list)),
            [
                Amf0Marker::StrictArray as u8, 0x00, 0x00, 0x00, 0x02,
                Amf0Marker::Object as u8, 0x00, 0x00, Amf0Marker::ObjectEnd as u8,
                Amf0Marker::Reference as u8, 0x00, 0x01,
            ]
        );
    }

    #[test]
    fn mixed_array_becomes_ecma_array() {
        let mut graph = AmfGraph::new();
        let id = graph.insert(AmfArray {
            dense: vec!["a".into()],
            assoc: vec![("name".into(), "x".into())],
        });

        let (graph, value) = round_trip(&graph, &AmfValue::Ref(id));
        let map = graph.ecma_array(&value).unwrap();
        assert_eq!(map.get(&AmfKey::Index(0)), Some(&AmfValue::from("a")));
        assert_eq!(map.get_str("name"), Some(&AmfValue::from("x")));
    }

    #[test]
    fn instance_as_typed_object() {
        let mut graph = AmfGraph::new();
        let person = graph.insert(Box::new(Person {
            name: "eve".into(),
            age: 5,
            friend: None,
        }) as Box<dyn AmfClass>);

        let (graph, value) = round_trip(&graph, &AmfValue::Ref(person));
        let object = graph.object(&value).unwrap();
        assert_eq!(object.class_name(), "com.example.Person");
        assert_eq!(object.get("age"), Some(&AmfValue::Number(5.0)));
        assert_eq!(object.get("friend"), Some(&AmfValue::Null));
    }

    #[test]
    fn amf3_only_kinds_are_rejected() {
        let mut graph = AmfGraph::new();
        let bytes = graph.insert(Bytes::from_static(b"abc"));
        let vector = graph.insert(AmfNode::VectorInt(AmfVector::from(vec![1])));
        let point = graph.insert(Box::new(Point::default()) as Box<dyn AmfClass>);

        let mut encoder = Amf0Encoder::new(Vec::new());
        for id in [bytes, vector, point] {
            assert!(matches!(
                encoder.encode_value(&graph, &AmfValue::Ref(id)),
                Err(AmfError::UnsupportedType(_))
            ));
        }
    }

    #[test]
    fn avmplus_round_trip() {
        let mut graph = AmfGraph::new();
        let ints = graph.insert(AmfNode::VectorInt(AmfVector::from(vec![1, 2])));

        let mut encoder = Amf0Encoder::new(Vec::new());
        encoder.encode_avmplus(&graph, &AmfValue::Ref(ints)).unwrap();
        encoder.encode_avmplus(&graph, &"abc".into()).unwrap();
        encoder.encode_avmplus(&graph, &"abc".into()).unwrap();
        let bytes = encoder.into_inner();
        assert_eq!(&bytes[bytes.len() - 3..], [Amf0Marker::AVMPlusObject as u8, 0x06, 0x00]);

        let mut decoder = Amf0Decoder::new(bytes.as_slice());
        let items: Vec<i32> = decoder.decode().unwrap();
        assert_eq!(items, [1, 2]);
        assert_eq!(decoder.decode_all().unwrap(), [AmfValue::from("abc"), AmfValue::from("abc")]);
    }
}
