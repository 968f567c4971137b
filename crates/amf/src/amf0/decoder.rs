//! AMF0 decoder

use std::sync::Arc;

use bytes::Buf;
use num_traits::FromPrimitive;
use scuffle_bytes_util::BufExt;

use super::Amf0Marker;
use crate::amf3::{Amf3Decoder, DecodeTables};
use crate::class::ClassRegistry;
use crate::convert::FromAmf;
use crate::error::{AmfError, Result};
use crate::graph::{AmfGraph, AmfNode, NodeId};
use crate::value::{AmfArray, AmfKey, AmfMap, AmfValue, TraitDescriptor};

/// AMF0 decoder.
///
/// Objects, typed objects and both array kinds are added to the reference
/// table as soon as their marker is read, so a [`Reference`](Amf0Marker::Reference)
/// inside an object can point at the object itself.
pub struct Amf0Decoder<B> {
    buf: B,
    next_marker: Option<Amf0Marker>,
    graph: AmfGraph,
    references: Vec<NodeId>,
    amf3: DecodeTables,
    registry: Option<Arc<dyn ClassRegistry>>,
}

impl<B> std::fmt::Debug for Amf0Decoder<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Amf0Decoder")
            .field("next_marker", &self.next_marker)
            .field("graph", &self.graph)
            .field("references", &self.references)
            .field("registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

impl<B> Amf0Decoder<B>
where
    B: Buf,
{
    /// Create a new decoder over a buffer.
    pub fn new(buf: B) -> Self {
        Self {
            buf,
            next_marker: None,
            graph: AmfGraph::new(),
            references: Vec::new(),
            amf3: DecodeTables::default(),
            registry: None,
        }
    }

    /// Instantiate typed objects through `registry`.
    pub fn with_registry(mut self, registry: Arc<dyn ClassRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Decode into an existing graph.
    pub fn with_graph(mut self, graph: AmfGraph) -> Self {
        self.graph = graph;
        self
    }

    /// The graph holding every decoded composite value.
    pub fn graph(&self) -> &AmfGraph {
        &self.graph
    }

    /// The graph, mutably.
    pub fn graph_mut(&mut self) -> &mut AmfGraph {
        &mut self.graph
    }

    /// Consumes the decoder, returning the graph.
    pub fn into_graph(self) -> AmfGraph {
        self.graph
    }

    /// Check if there are remaining bytes to read.
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.next_marker.is_some() || self.buf.has_remaining()
    }

    /// Clears the AMF0 reference table and the AMF3 tables used by
    /// [`AVMPlusObject`](Amf0Marker::AVMPlusObject) values.
    pub fn reset_references(&mut self) {
        self.references.clear();
        self.amf3 = DecodeTables::default();
    }

    /// Decode the next value.
    ///
    /// Unknown marker bytes are skipped.
    pub fn decode_value(&mut self) -> Result<AmfValue> {
        let marker = self.read_marker()?;

        match marker {
            Amf0Marker::Number => Ok(AmfValue::Number(self.buf.take_f64()?)),
            Amf0Marker::Boolean => Ok(AmfValue::Boolean(self.buf.take_u8()? != 0)),
            Amf0Marker::String => self.decode_normal_string().map(AmfValue::String),
            Amf0Marker::LongString => self.decode_long_string().map(AmfValue::String),
            Amf0Marker::XmlDocument => self.decode_long_string().map(AmfValue::XmlDocument),
            Amf0Marker::Date => {
                let millis = self.buf.take_f64()?;
                // The timezone is ignored.
                self.buf.take_i16()?;
                Ok(AmfValue::Date(millis))
            }
            Amf0Marker::Null => Ok(AmfValue::Null),
            Amf0Marker::Undefined | Amf0Marker::Unsupported => Ok(AmfValue::Undefined),
            Amf0Marker::Reference => {
                let index = usize::from(self.buf.take_u16()?);
                self.references
                    .get(index)
                    .map(|id| AmfValue::Ref(*id))
                    .ok_or(AmfError::InvalidReference { table: "object", index })
            }
            Amf0Marker::Object => self.decode_object(Arc::new(TraitDescriptor::anonymous())),
            Amf0Marker::TypedObject => {
                let class_name = self.decode_normal_string()?;
                self.decode_object(Arc::new(TraitDescriptor::dynamic(class_name)))
            }
            Amf0Marker::EcmaArray => self.decode_ecma_array(),
            Amf0Marker::StrictArray => self.decode_strict_array(),
            Amf0Marker::AVMPlusObject => self.decode_avmplus(),
            Amf0Marker::MovieClip | Amf0Marker::Recordset | Amf0Marker::ObjectEnd => {
                Err(AmfError::UnsupportedMarker(marker as u8))
            }
        }
    }

    /// Decode all values from the buffer until the end.
    pub fn decode_all(&mut self) -> Result<Vec<AmfValue>> {
        let mut values = Vec::new();

        while self.has_remaining() {
            values.push(self.decode_value()?);
        }

        Ok(values)
    }

    /// Decode the next value and convert it with [`FromAmf`].
    pub fn decode<T: FromAmf>(&mut self) -> Result<T> {
        let value = self.decode_value()?;
        T::from_amf(&self.graph, &value)
    }

    /// Peek the next marker in the buffer without consuming it.
    pub fn peek_marker(&mut self) -> Result<Amf0Marker> {
        let marker = self.read_marker()?;
        // Buffer the marker for the next read
        self.next_marker = Some(marker);

        Ok(marker)
    }

    fn read_marker(&mut self) -> Result<Amf0Marker> {
        if let Some(marker) = self.next_marker.take() {
            return Ok(marker);
        }

        loop {
            let byte = self.buf.take_u8()?;
            match Amf0Marker::from_u8(byte) {
                Some(marker) => return Ok(marker),
                None => tracing::debug!(marker = byte, "skipping unknown amf0 marker"),
            }
        }
    }

    fn expect_marker(&mut self, expect: &'static [Amf0Marker]) -> Result<Amf0Marker> {
        let marker = self.read_marker()?;

        if !expect.contains(&marker) {
            self.next_marker = Some(marker);
            Err(AmfError::UnexpectedType {
                expected: "amf0 marker",
                got: marker_name(marker),
            })
        } else {
            Ok(marker)
        }
    }

    /// Decode a number.
    pub fn decode_number(&mut self) -> Result<f64> {
        self.expect_marker(&[Amf0Marker::Number])?;
        Ok(self.buf.take_f64()?)
    }

    /// Decode a boolean.
    pub fn decode_boolean(&mut self) -> Result<bool> {
        self.expect_marker(&[Amf0Marker::Boolean])?;
        Ok(self.buf.take_u8()? != 0)
    }

    /// Decode a string.
    ///
    /// This function can decode both normal strings and long strings.
    pub fn decode_string(&mut self) -> Result<String> {
        let marker = self.expect_marker(&[Amf0Marker::String, Amf0Marker::LongString])?;

        if marker == Amf0Marker::String {
            self.decode_normal_string()
        } else {
            self.decode_long_string()
        }
    }

    /// Decode a null value.
    ///
    /// This function can also decode undefined values.
    pub fn decode_null(&mut self) -> Result<()> {
        self.expect_marker(&[Amf0Marker::Null, Amf0Marker::Undefined])?;
        Ok(())
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.buf.take_bytes(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn decode_normal_string(&mut self) -> Result<String> {
        let len = self.buf.take_u16()?;
        self.read_utf8(len.into())
    }

    fn decode_long_string(&mut self) -> Result<String> {
        let len = self.buf.take_u32()?;
        self.read_utf8(len as usize)
    }

    fn register(&mut self) -> NodeId {
        let slot = self.graph.reserve();
        self.references.push(slot);
        slot
    }

    /// Reads the next property name, `None` at the end of the object.
    fn decode_object_key(&mut self) -> Result<Option<String>> {
        // Some muxers cut the final object end marker.
        if !self.buf.has_remaining() {
            return Ok(None);
        }

        // Object keys are not preceeded with a marker and are always normal strings
        let key = self.decode_normal_string()?;

        // The object end marker is preceeded by an empty string
        if key.is_empty() && self.buf.chunk().first() == Some(&(Amf0Marker::ObjectEnd as u8)) {
            self.buf.advance(1);
            return Ok(None);
        }

        Ok(Some(key))
    }

    fn decode_object(&mut self, traits: Arc<TraitDescriptor>) -> Result<AmfValue> {
        let slot = self.register();

        let mut properties = Vec::new();
        while let Some(key) = self.decode_object_key()? {
            let value = self.decode_value()?;
            properties.push((key, value));
        }

        self.graph.materialize(slot, traits, properties, self.registry.as_deref())?;
        Ok(AmfValue::Ref(slot))
    }

    fn decode_ecma_array(&mut self) -> Result<AmfValue> {
        // The declared count is only a hint, the end marker terminates the array.
        let _count = self.buf.take_u32()?;
        let slot = self.register();

        let mut map = AmfMap::new();
        while let Some(key) = self.decode_object_key()? {
            let value = self.decode_value()?;
            map.insert(AmfKey::parse(key), value);
        }

        let node = if map.is_list() {
            AmfNode::Array(AmfArray::from(map.into_entries().into_iter().map(|(_, v)| v).collect::<Vec<_>>()))
        } else {
            AmfNode::EcmaArray(map)
        };

        self.graph.complete(slot, node);
        Ok(AmfValue::Ref(slot))
    }

    fn decode_strict_array(&mut self) -> Result<AmfValue> {
        let count = self.buf.take_u32()?;
        let slot = self.register();

        let mut values = Vec::with_capacity((count as usize).min(self.buf.remaining()));
        for _ in 0..count {
            values.push(self.decode_value()?);
        }

        self.graph.complete(slot, AmfNode::Array(AmfArray::from(values)));
        Ok(AmfValue::Ref(slot))
    }

    fn decode_avmplus(&mut self) -> Result<AmfValue> {
        let graph = std::mem::take(&mut self.graph);
        let tables = std::mem::take(&mut self.amf3);

        let mut decoder = Amf3Decoder::from_parts(&mut self.buf, graph, tables, self.registry.clone());
        let result = decoder.decode_value();

        let (graph, tables) = decoder.into_parts();
        self.graph = graph;
        self.amf3 = tables;

        result
    }
}

fn marker_name(marker: Amf0Marker) -> &'static str {
    match marker {
        Amf0Marker::Number => "number",
        Amf0Marker::Boolean => "boolean",
        Amf0Marker::String | Amf0Marker::LongString => "string",
        Amf0Marker::Object | Amf0Marker::TypedObject => "object",
        Amf0Marker::MovieClip => "movie clip",
        Amf0Marker::Null => "null",
        Amf0Marker::Undefined | Amf0Marker::Unsupported => "undefined",
        Amf0Marker::Reference => "reference",
        Amf0Marker::EcmaArray => "ecma array",
        Amf0Marker::ObjectEnd => "object end",
        Amf0Marker::StrictArray => "array",
        Amf0Marker::Date => "date",
        Amf0Marker::Recordset => "recordset",
        Amf0Marker::XmlDocument => "xml document",
        Amf0Marker::AVMPlusObject => "avmplus object",
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;
    use crate::class::TypeRegistry;
    use crate::class::tests::Person;

    #[test]
    fn scalars() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::Number as u8, 0x40, 0x09, 0x21, 0xfb, 0x54, 0x44, 0x2d, 0x18,
            Amf0Marker::Boolean as u8, 0x01,
            Amf0Marker::String as u8, 0x00, 0x02, b'h', b'i',
            Amf0Marker::LongString as u8, 0x00, 0x00, 0x00, 0x01, b'x',
            Amf0Marker::Null as u8,
            Amf0Marker::Undefined as u8,
            Amf0Marker::Unsupported as u8,
            Amf0Marker::Date as u8, 0x40, 0x8f, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xc4,
            Amf0Marker::XmlDocument as u8, 0x00, 0x00, 0x00, 0x04, b'<', b'a', b'/', b'>',
        ];

        let values = Amf0Decoder::new(&bytes[..]).decode_all().unwrap();
        assert_eq!(
            values,
            [
                AmfValue::Number(std::f64::consts::PI),
                AmfValue::Boolean(true),
                AmfValue::String("hi".into()),
                AmfValue::String("x".into()),
                AmfValue::Null,
                AmfValue::Undefined,
                AmfValue::Undefined,
                AmfValue::Date(1000.0),
                AmfValue::XmlDocument("<a/>".into()),
            ]
        );
    }

    #[test]
    fn typed_helpers() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::String as u8, 0x00, 0x02, b'h', b'i',
            Amf0Marker::Number as u8, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0,
            Amf0Marker::Undefined as u8,
        ];

        let mut decoder = Amf0Decoder::new(&bytes[..]);
        assert!(matches!(
            decoder.decode_number(),
            Err(AmfError::UnexpectedType { got: "string", .. })
        ));
        assert_eq!(decoder.peek_marker().unwrap(), Amf0Marker::String);
        assert_eq!(decoder.decode_string().unwrap(), "hi");
        assert_eq!(decoder.decode::<u8>().unwrap(), 1);
        decoder.decode_null().unwrap();
        assert!(!decoder.has_remaining());
    }

    #[test]
    fn ecma_array_list() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::EcmaArray as u8, 0x00, 0x00, 0x00, 0x02,
            0x00, 0x01, b'0', Amf0Marker::String as u8, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o',
            0x00, 0x01, b'1', Amf0Marker::String as u8, 0x00, 0x05, b'w', b'o', b'r', b'l', b'd',
            0x00, 0x00, Amf0Marker::ObjectEnd as u8,
        ];

        let mut decoder = Amf0Decoder::new(&bytes[..]);
        let values: Vec<String> = decoder.decode().unwrap();
        assert_eq!(values, ["hello", "world"]);
    }

    #[test]
    fn ecma_array_map() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::EcmaArray as u8, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, b'1', Amf0Marker::String as u8, 0x00, 0x01, b'a',
            0x00, 0x03, b'k', b'e', b'y', Amf0Marker::Boolean as u8, 0x00,
            0x00, 0x00, Amf0Marker::ObjectEnd as u8,
        ];

        let mut decoder = Amf0Decoder::new(&bytes[..]);
        let value = decoder.decode_value().unwrap();
        let map = decoder.graph().ecma_array(&value).unwrap();

        assert_eq!(map.get(&AmfKey::Index(1)), Some(&AmfValue::from("a")));
        assert_eq!(map.get_str("key"), Some(&AmfValue::Boolean(false)));
    }

    #[test]
    fn object_with_self_reference() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::Object as u8,
            0x00, 0x04, b's', b'e', b'l', b'f', Amf0Marker::Reference as u8, 0x00, 0x00,
            0x00, 0x00, Amf0Marker::ObjectEnd as u8,
        ];

        let mut decoder = Amf0Decoder::new(&bytes[..]);
        let value = decoder.decode_value().unwrap();
        let object = decoder.graph().object(&value).unwrap();
        assert_eq!(object.get("self"), Some(&value));
    }

    #[test]
    fn typed_object_with_registry() {
        let mut registry = TypeRegistry::new();
        registry.register::<Person>("com.example.Person");

        let mut bytes = vec![Amf0Marker::TypedObject as u8, 0x00, 0x12];
        bytes.extend_from_slice(b"com.example.Person");
        bytes.extend_from_slice(b"\x00\x04name");
        bytes.extend_from_slice(&[Amf0Marker::String as u8, 0x00, 0x03]);
        bytes.extend_from_slice(b"bob");
        bytes.extend_from_slice(b"\x00\x03age");
        bytes.push(Amf0Marker::Number as u8);
        bytes.extend_from_slice(&7.0f64.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x00, Amf0Marker::ObjectEnd as u8]);

        let mut decoder = Amf0Decoder::new(bytes.as_slice()).with_registry(Arc::new(registry));
        let value = decoder.decode_value().unwrap();
        let person = decoder.graph().instance::<Person>(value.node().unwrap()).unwrap();
        assert_eq!(person.name, "bob");
        assert_eq!(person.age, 7);
    }

    #[test]
    fn strict_array_and_references() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::StrictArray as u8, 0x00, 0x00, 0x00, 0x02,
            Amf0Marker::Object as u8, 0x00, 0x00, Amf0Marker::ObjectEnd as u8,
            Amf0Marker::Reference as u8, 0x00, 0x01,
            Amf0Marker::Reference as u8, 0x00, 0x05,
        ];

        let mut decoder = Amf0Decoder::new(&bytes[..]);
        let value = decoder.decode_value().unwrap();
        let array = decoder.graph().array(&value).unwrap();
        assert_eq!(array.dense[0], array.dense[1]);

        assert!(matches!(
            decoder.decode_value(),
            Err(AmfError::InvalidReference { table: "object", index: 5 })
        ));
    }

    #[test]
    fn avmplus_switch() {
        #[rustfmt::skip]
        let bytes = [
            Amf0Marker::AVMPlusObject as u8, 0x06, 0x07, b'a', b'b', b'c',
            Amf0Marker::AVMPlusObject as u8, 0x06, 0x00,
            Amf0Marker::Boolean as u8, 0x01,
        ];

        let mut decoder = Amf0Decoder::new(&bytes[..]);
        assert_eq!(decoder.decode_value().unwrap(), AmfValue::from("abc"));
        assert_eq!(decoder.decode_value().unwrap(), AmfValue::from("abc"));
        assert_eq!(decoder.decode_value().unwrap(), AmfValue::Boolean(true));
    }

    #[test]
    fn unknown_and_unsupported_markers() {
        let mut decoder = Amf0Decoder::new(&[0x20, 0x30, Amf0Marker::Null as u8][..]);
        assert_eq!(decoder.decode_value().unwrap(), AmfValue::Null);

        let mut decoder = Amf0Decoder::new(&[Amf0Marker::MovieClip as u8][..]);
        assert!(matches!(decoder.decode_value(), Err(AmfError::UnsupportedMarker(0x04))));
    }

    #[test]
    fn truncated() {
        let mut decoder = Amf0Decoder::new(&[Amf0Marker::String as u8, 0x00, 0x05, b'a'][..]);
        assert!(matches!(
            decoder.decode_value(),
            Err(AmfError::TruncatedInput {
                requested: 5,
                available: 1
            })
        ));

        let mut decoder = Amf0Decoder::new(&[Amf0Marker::Number as u8, 0x00][..]);
        assert!(matches!(decoder.decode_value(), Err(AmfError::TruncatedInput { .. })));
    }

    #[test]
    fn missing_object_end() {
        let mut decoder = Amf0Decoder::new(&[Amf0Marker::Object as u8, 0x00, 0x01, b'a', Amf0Marker::Null as u8][..]);
        let value = decoder.decode_value().unwrap();
        assert_eq!(decoder.graph().object(&value).unwrap().get("a"), Some(&AmfValue::Null));
    }
}
