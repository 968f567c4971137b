use std::io;
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};

use super::{Amf3Marker, EncodeTables};
use crate::cache::AmfCache;
use crate::class::{DataOutput, ExternalSink};
use crate::error::{AmfError, Result};
use crate::graph::{AmfGraph, AmfNode, NodeId};
use crate::u29::{I29_MAX, I29_MIN, RefOrValue, write_i29, write_u29};
use crate::value::{AmfKey, AmfMap, AmfObject, AmfValue, TraitDescriptor};

/// AMF3 encoder.
///
/// Reference tables are kept for the lifetime of the encoder, so encoding the
/// same node twice writes a reference the second time.
#[derive(Debug)]
pub struct Amf3Encoder<W> {
    writer: W,
    tables: EncodeTables,
    cache: Option<AmfCache>,
    compact_numbers: bool,
}

impl<W> Amf3Encoder<W> {
    /// Create a new encoder from a writer.
    pub fn new(writer: W) -> Self {
        Self::from_parts(writer, EncodeTables::default(), None)
    }

    pub(crate) fn from_parts(writer: W, tables: EncodeTables, cache: Option<AmfCache>) -> Self {
        Self {
            writer,
            tables,
            cache,
            compact_numbers: false,
        }
    }

    pub(crate) fn into_tables(self) -> EncodeTables {
        self.tables
    }

    /// Share trait descriptors of typed instances through `cache`.
    pub fn with_cache(mut self, cache: AmfCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Write whole numbers that fit into 29 bits with the integer marker.
    pub fn compact_numbers(mut self, enabled: bool) -> Self {
        self.compact_numbers = enabled;
        self
    }

    /// Clears the string, trait and object tables.
    pub fn reset_references(&mut self) {
        self.tables = EncodeTables::default();
    }

    /// Consumes the encoder, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn node_marker(node: &AmfNode) -> Result<Amf3Marker> {
    match node {
        AmfNode::Object(_) | AmfNode::Instance(_) => Ok(Amf3Marker::Object),
        AmfNode::Array(_) | AmfNode::EcmaArray(_) => Ok(Amf3Marker::Array),
        AmfNode::ByteArray(_) => Ok(Amf3Marker::ByteArray),
        AmfNode::VectorInt(_) => Ok(Amf3Marker::VectorInt),
        AmfNode::VectorUInt(_) => Ok(Amf3Marker::VectorUInt),
        AmfNode::VectorNumber(_) => Ok(Amf3Marker::VectorDouble),
        AmfNode::VectorObject(_) => Ok(Amf3Marker::VectorObject),
        AmfNode::Pending => Err(AmfError::UnsupportedType("pending node")),
    }
}

fn inline_len(len: usize) -> Result<RefOrValue> {
    Ok(RefOrValue::Inline(u32::try_from(len)?))
}

impl<W> Amf3Encoder<W>
where
    W: io::Write,
{
    /// Encode AMF3 Undefined value.
    pub fn encode_undefined(&mut self) -> Result<()> {
        self.writer.write_u8(Amf3Marker::Undefined as u8)?;
        Ok(())
    }

    /// Encode AMF3 Null value.
    pub fn encode_null(&mut self) -> Result<()> {
        self.writer.write_u8(Amf3Marker::Null as u8)?;
        Ok(())
    }

    /// Encode a [`bool`] using the true and false markers.
    pub fn encode_boolean(&mut self, value: bool) -> Result<()> {
        let marker = if value { Amf3Marker::True } else { Amf3Marker::False };
        self.writer.write_u8(marker as u8)?;
        Ok(())
    }

    /// Encode an [`i32`], falling back to a double outside of 29 bits.
    pub fn encode_integer(&mut self, value: i32) -> Result<()> {
        if (I29_MIN..=I29_MAX).contains(&value) {
            self.writer.write_u8(Amf3Marker::Integer as u8)?;
            write_i29(&mut self.writer, value)
        } else {
            self.encode_double(value.into())
        }
    }

    /// Encode an [`f64`] as a double.
    pub fn encode_double(&mut self, value: f64) -> Result<()> {
        self.writer.write_u8(Amf3Marker::Double as u8)?;
        self.writer.write_f64::<BigEndian>(value)?;
        Ok(())
    }

    /// Encode a number, honoring [`compact_numbers`](Amf3Encoder::compact_numbers).
    pub fn encode_number(&mut self, value: f64) -> Result<()> {
        let whole = value.fract() == 0.0 && !(value == 0.0 && value.is_sign_negative());
        if self.compact_numbers && whole && value >= f64::from(I29_MIN) && value <= f64::from(I29_MAX) {
            self.encode_integer(value as i32)
        } else {
            self.encode_double(value)
        }
    }

    /// Encode a string value.
    pub fn encode_string(&mut self, value: &str) -> Result<()> {
        self.writer.write_u8(Amf3Marker::String as u8)?;
        self.write_string(value)
    }

    /// Encode a date given in milliseconds since the unix epoch.
    pub fn encode_date(&mut self, millis: f64) -> Result<()> {
        self.writer.write_u8(Amf3Marker::Date as u8)?;
        RefOrValue::Inline(0).write(&mut self.writer)?;
        self.writer.write_f64::<BigEndian>(millis)?;
        self.tables.next_object += 1;
        Ok(())
    }

    fn encode_xml(&mut self, marker: Amf3Marker, value: &str) -> Result<()> {
        self.writer.write_u8(marker as u8)?;
        inline_len(value.len())?.write(&mut self.writer)?;
        self.writer.write_all(value.as_bytes())?;
        self.tables.next_object += 1;
        Ok(())
    }

    /// Encode any value, following references into `graph`.
    pub fn encode_value(&mut self, graph: &AmfGraph, value: &AmfValue) -> Result<()> {
        match value {
            AmfValue::Undefined => self.encode_undefined(),
            AmfValue::Null => self.encode_null(),
            AmfValue::Boolean(value) => self.encode_boolean(*value),
            AmfValue::Number(value) => self.encode_number(*value),
            AmfValue::Integer(value) => self.encode_integer(*value),
            AmfValue::String(value) => self.encode_string(value),
            AmfValue::Date(value) => self.encode_date(*value),
            AmfValue::XmlDocument(value) => self.encode_xml(Amf3Marker::XmlDocument, value),
            AmfValue::Xml(value) => self.encode_xml(Amf3Marker::Xml, value),
            AmfValue::Ref(id) => self.encode_node(graph, *id),
        }
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return RefOrValue::Inline(0).write(&mut self.writer);
        }

        if let Some(index) = self.tables.strings.get(value) {
            return RefOrValue::Reference(*index as usize).write(&mut self.writer);
        }

        let index = u32::try_from(self.tables.strings.len())?;
        self.tables.strings.insert(value.to_owned(), index);

        inline_len(value.len())?.write(&mut self.writer)?;
        self.writer.write_all(value.as_bytes())?;
        Ok(())
    }

    fn write_traits(&mut self, traits: &TraitDescriptor) -> Result<()> {
        if let Some(index) = self.tables.traits.get(traits) {
            return write_u29(&mut self.writer, (index << 2) | 0b01);
        }

        let index = u32::try_from(self.tables.traits.len())?;
        self.tables.traits.insert(traits.clone(), index);

        let sealed = if traits.kind.is_externalizable() { 0 } else { traits.sealed.len() };
        let mut header = u32::try_from(sealed)?
            .checked_mul(16)
            .ok_or(AmfError::U29OutOfRange(sealed as i64))?
            | 0b11;
        if traits.kind.is_externalizable() {
            header |= 0b0100;
        }
        if traits.kind.is_dynamic() {
            header |= 0b1000;
        }

        write_u29(&mut self.writer, header)?;
        self.write_string(&traits.class_name)?;
        if !traits.kind.is_externalizable() {
            for name in &traits.sealed {
                self.write_string(name)?;
            }
        }

        Ok(())
    }

    fn encode_node(&mut self, graph: &AmfGraph, id: NodeId) -> Result<()> {
        let node = graph.get(id).ok_or(AmfError::InvalidReference {
            table: "graph",
            index: id.index(),
        })?;

        self.writer.write_u8(node_marker(node)? as u8)?;

        if let Some(index) = self.tables.objects.get(&id) {
            return RefOrValue::Reference(*index as usize).write(&mut self.writer);
        }

        self.tables.objects.insert(id, self.tables.next_object);
        self.tables.next_object += 1;

        match node {
            AmfNode::Object(object) => self.write_object(graph, object),
            AmfNode::Instance(instance) => {
                let traits = match &self.cache {
                    Some(cache) => cache.traits_for(&**instance),
                    None => Arc::new(instance.traits()),
                };

                self.write_traits(&traits)?;

                if traits.kind.is_externalizable() {
                    let mut sink = ExternalWriter { encoder: self, graph };
                    return instance.write_external(&mut DataOutput::new(&mut sink));
                }

                for name in &traits.sealed {
                    let value = instance.get_property(name).unwrap_or(AmfValue::Undefined);
                    self.encode_value(graph, &value)?;
                }

                if traits.kind.is_dynamic() {
                    self.write_string("")?;
                }

                Ok(())
            }
            AmfNode::Array(array) => {
                inline_len(array.dense.len())?.write(&mut self.writer)?;
                for (key, value) in &array.assoc {
                    self.write_string(key)?;
                    self.encode_value(graph, value)?;
                }
                self.write_string("")?;

                for value in &array.dense {
                    self.encode_value(graph, value)?;
                }

                Ok(())
            }
            AmfNode::EcmaArray(map) => self.write_map(graph, map),
            AmfNode::ByteArray(bytes) => {
                inline_len(bytes.len())?.write(&mut self.writer)?;
                self.writer.write_all(bytes)?;
                Ok(())
            }
            AmfNode::VectorInt(vector) => {
                inline_len(vector.items.len())?.write(&mut self.writer)?;
                self.writer.write_u8(u8::from(vector.fixed))?;
                for item in &vector.items {
                    self.writer.write_i32::<BigEndian>(*item)?;
                }
                Ok(())
            }
            AmfNode::VectorUInt(vector) => {
                inline_len(vector.items.len())?.write(&mut self.writer)?;
                self.writer.write_u8(u8::from(vector.fixed))?;
                for item in &vector.items {
                    self.writer.write_u32::<BigEndian>(*item)?;
                }
                Ok(())
            }
            AmfNode::VectorNumber(vector) => {
                inline_len(vector.items.len())?.write(&mut self.writer)?;
                self.writer.write_u8(u8::from(vector.fixed))?;
                for item in &vector.items {
                    self.writer.write_f64::<BigEndian>(*item)?;
                }
                Ok(())
            }
            AmfNode::VectorObject(vector) => {
                inline_len(vector.items.len())?.write(&mut self.writer)?;
                self.writer.write_u8(u8::from(vector.fixed))?;
                self.write_string(&vector.type_name)?;
                for item in &vector.items {
                    self.encode_value(graph, item)?;
                }
                Ok(())
            }
            AmfNode::Pending => Err(AmfError::UnsupportedType("pending node")),
        }
    }

    fn write_object(&mut self, graph: &AmfGraph, object: &AmfObject) -> Result<()> {
        let traits = object.traits();
        if traits.kind.is_externalizable() {
            return Err(AmfError::UnsupportedType("externalizable object without an instance"));
        }

        self.write_traits(traits)?;

        for name in &traits.sealed {
            let value = object.get(name).cloned().unwrap_or(AmfValue::Undefined);
            self.encode_value(graph, &value)?;
        }

        if traits.kind.is_dynamic() {
            for (key, value) in object.iter() {
                if key.is_empty() || traits.sealed.iter().any(|name| name == key) {
                    continue;
                }

                self.write_string(key)?;
                self.encode_value(graph, value)?;
            }

            self.write_string("")?;
        }

        Ok(())
    }

    /// Associative arrays become AMF3 arrays. The contiguous numeric keys
    /// form the dense part, every other key goes to the associative part.
    fn write_map(&mut self, graph: &AmfGraph, map: &AmfMap) -> Result<()> {
        let dense_len = map.dense_len();
        inline_len(dense_len as usize)?.write(&mut self.writer)?;

        for (key, value) in map.iter() {
            if key.as_index().is_some_and(|index| index < dense_len) {
                continue;
            }

            self.write_string(&key.to_string())?;
            self.encode_value(graph, value)?;
        }
        self.write_string("")?;

        for index in 0..dense_len {
            let value = map.get(&AmfKey::Index(index)).cloned().unwrap_or(AmfValue::Undefined);
            self.encode_value(graph, &value)?;
        }

        Ok(())
    }
}

/// Routes [`DataOutput`] writes into the encoder.
struct ExternalWriter<'a, W> {
    encoder: &'a mut Amf3Encoder<W>,
    graph: &'a AmfGraph,
}

impl<W: io::Write> ExternalSink for ExternalWriter<'_, W> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.encoder.writer.write_all(bytes)?;
        Ok(())
    }

    fn write_value(&mut self, value: &AmfValue) -> Result<()> {
        self.encoder.encode_value(self.graph, value)
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::amf3::Amf3Decoder;
    use crate::class::TypeRegistry;
    use crate::class::tests::{Person, Point};
    use crate::value::{AmfArray, AmfObjectVector, AmfVector};

    fn encode(graph: &AmfGraph, value: &AmfValue) -> Vec<u8> {
        let mut encoder = Amf3Encoder::new(Vec::new());
        encoder.encode_value(graph, value).unwrap();
        encoder.into_inner()
    }

    #[test]
    fn scalars() {
        let graph = AmfGraph::new();

        assert_eq!(encode(&graph, &AmfValue::Integer(-1)), [0x04, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(encode(&graph, &AmfValue::Integer(0x0fff_ffff)), [0x04, 0xbf, 0xff, 0xff, 0xff]);
        assert_eq!(encode(&graph, &AmfValue::Integer(0x1000_0000))[0], Amf3Marker::Double as u8);
        assert_eq!(encode(&graph, &AmfValue::Boolean(true)), [0x03]);
        assert_eq!(encode(&graph, &AmfValue::String(String::new())), [0x06, 0x01]);
        assert_eq!(encode(&graph, &AmfValue::Number(2.0))[0], Amf3Marker::Double as u8);

        let mut encoder = Amf3Encoder::new(Vec::new()).compact_numbers(true);
        encoder.encode_number(2.0).unwrap();
        encoder.encode_number(-0.0).unwrap();
        encoder.encode_number(2.5).unwrap();
        let bytes = encoder.into_inner();
        assert_eq!(&bytes[..3], [0x04, 0x02, 0x05]);
        assert_eq!(bytes.len(), 2 + 9 + 9);
    }

    #[test]
    fn string_references() {
        let mut encoder = Amf3Encoder::new(Vec::new());
        encoder.encode_string("abc").unwrap();
        encoder.encode_string("").unwrap();
        encoder.encode_string("abc").unwrap();

        assert_eq!(encoder.into_inner(), [0x06, 0x07, b'a', b'b', b'c', 0x06, 0x01, 0x06, 0x00]);
    }

    #[test]
    fn vectors() {
        let mut graph = AmfGraph::new();
        let ints = graph.insert(AmfNode::VectorInt(AmfVector::from(vec![2, 2000, i32::MAX, i32::MIN])));
        let objects = graph.insert(AmfNode::VectorObject(AmfObjectVector {
            type_name: String::new(),
            fixed: false,
            items: vec!["Paul".into(), "".into()],
        }));

        #[rustfmt::skip]
        assert_eq!(
            encode(&graph, &AmfValue::Ref(ints)),
            [
                0x0d, 0x09, 0x00,
                0x00, 0x00, 0x00, 0x02,
                0x00, 0x00, 0x07, 0xd0,
                0x7f, 0xff, 0xff, 0xff,
                0x80, 0x00, 0x00, 0x00,
            ]
        );
        assert_eq!(
            encode(&graph, &AmfValue::Ref(objects)),
            [0x10, 0x05, 0x00, 0x01, 0x06, 0x09, b'P', b'a', b'u', b'l', 0x06, 0x01]
        );
    }

    #[test]
    fn same_node_twice_is_a_reference() {
        let mut graph = AmfGraph::new();
        let object: AmfObject = [("a", AmfValue::Integer(1))].into_iter().collect();
        let object = graph.insert(object);
        let list = graph.insert(AmfArray::from(vec![AmfValue::Ref(object), AmfValue::Ref(object)]));

        let bytes = encode(&graph, &AmfValue::Ref(list));

        #[rustfmt::skip]
        assert_eq!(
            bytes,
            [
                0x09, 0x05, 0x01,
                0x0a, 0x0b, 0x01, 0x03, b'a', 0x04, 0x01, 0x01,
                0x0a, 0x02,
            ]
        );

        let mut decoder = Amf3Decoder::new(bytes.as_slice());
        let value = decoder.decode_value().unwrap();
        let array = decoder.graph().array(&value).unwrap();
        assert_eq!(array.dense[0], array.dense[1]);
    }

    #[test]
    fn dates_keep_object_indices_in_sync() {
        let mut graph = AmfGraph::new();
        let object = graph.insert(AmfObject::new());
        let list = graph.insert(AmfArray::from(vec![
            AmfValue::Date(0.0),
            AmfValue::Ref(object),
            AmfValue::Ref(object),
        ]));

        let bytes = encode(&graph, &AmfValue::Ref(list));
        let mut decoder = Amf3Decoder::new(bytes.as_slice());
        let value = decoder.decode_value().unwrap();
        let array = decoder.graph().array(&value).unwrap();

        assert_eq!(array.dense[0], AmfValue::Date(0.0));
        assert!(decoder.graph().object(&array.dense[1]).is_some());
        assert_eq!(array.dense[1], array.dense[2]);
    }

    #[test]
    fn instances_round_trip() {
        let mut graph = AmfGraph::new();
        let alice = graph.insert(Box::new(Person {
            name: "alice".into(),
            age: 30,
            friend: None,
        }) as Box<dyn crate::class::AmfClass>);
        let bob = graph.insert(Box::new(Person {
            name: "bob".into(),
            age: 41,
            friend: Some(alice),
        }) as Box<dyn crate::class::AmfClass>);
        if let Some(person) = graph.instance_mut::<Person>(alice) {
            person.friend = Some(bob);
        }

        let mut encoder = Amf3Encoder::new(Vec::new()).with_cache(AmfCache::new());
        encoder.encode_value(&graph, &AmfValue::Ref(alice)).unwrap();
        let bytes = encoder.into_inner();

        let mut registry = TypeRegistry::new();
        registry.register::<Person>("com.example.Person");

        let mut decoder = Amf3Decoder::new(bytes.as_slice()).with_registry(Arc::new(registry));
        let value = decoder.decode_value().unwrap();
        let graph = decoder.graph();

        let alice = value.node().unwrap();
        let first = graph.instance::<Person>(alice).unwrap();
        assert_eq!(first.name, "alice");

        let bob = first.friend.unwrap();
        let second = graph.instance::<Person>(bob).unwrap();
        assert_eq!(second.name, "bob");
        assert_eq!(second.age, 41);
        assert_eq!(second.friend, Some(alice));
    }

    #[test]
    fn externalizable_round_trip() {
        let mut graph = AmfGraph::new();
        let point = Point {
            x: 1.0,
            y: 2.0,
            label: "origin".into(),
        };
        let id = graph.insert(Box::new(point.clone()) as Box<dyn crate::class::AmfClass>);

        let bytes = encode(&graph, &AmfValue::Ref(id));
        assert_eq!(&bytes[..3], [0x0a, 0x07, 0x23]);

        let mut registry = TypeRegistry::new();
        registry.register::<Point>("com.example.Point");
        let mut decoder = Amf3Decoder::new(bytes.as_slice()).with_registry(Arc::new(registry));
        let value = decoder.decode_value().unwrap();
        assert_eq!(decoder.graph().instance::<Point>(value.node().unwrap()), Some(&point));
    }

    #[test]
    fn ecma_array_becomes_mixed_array() {
        let mut graph = AmfGraph::new();
        let map: AmfMap = [("0", "a"), ("name", "x"), ("1", "b")].into_iter().collect();
        let id = graph.insert(map);

        let bytes = encode(&graph, &AmfValue::Ref(id));
        let mut decoder = Amf3Decoder::new(bytes.as_slice());
        let value = decoder.decode_value().unwrap();
        let array = decoder.graph().array(&value).unwrap();

        assert_eq!(array.dense, [AmfValue::from("a"), AmfValue::from("b")]);
        assert_eq!(array.assoc, [("name".to_owned(), AmfValue::from("x"))]);
    }

    #[test]
    fn pending_nodes_fail() {
        let mut graph = AmfGraph::new();
        let id = graph.reserve();
        let mut encoder = Amf3Encoder::new(Vec::new());
        assert!(matches!(
            encoder.encode_value(&graph, &AmfValue::Ref(id)),
            Err(AmfError::UnsupportedType(_))
        ));
    }
}
