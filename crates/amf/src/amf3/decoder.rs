use std::sync::Arc;

use bytes::{Buf, Bytes};
use num_traits::FromPrimitive;
use scuffle_bytes_util::BufExt;

use super::{Amf3Marker, DecodeTables};
use crate::class::{ClassRegistry, DataInput, ExternalSource};
use crate::convert::FromAmf;
use crate::error::{AmfError, Result};
use crate::graph::{AmfGraph, AmfNode};
use crate::u29::{RefOrValue, read_i29, read_u29};
use crate::value::{AmfArray, AmfObjectVector, AmfValue, AmfVector, TraitDescriptor, TraitKind};

/// AMF3 decoder.
///
/// Composite values are stored in the decoder's [`AmfGraph`]. The reference
/// tables live as long as the decoder, call
/// [`reset_references`](Amf3Decoder::reset_references) between independent
/// payloads.
pub struct Amf3Decoder<B> {
    buf: B,
    graph: AmfGraph,
    tables: DecodeTables,
    registry: Option<Arc<dyn ClassRegistry>>,
}

impl<B> std::fmt::Debug for Amf3Decoder<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Amf3Decoder")
            .field("graph", &self.graph)
            .field("tables", &self.tables)
            .field("registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

impl<B> Amf3Decoder<B>
where
    B: Buf,
{
    /// Create a new decoder over a buffer.
    pub fn new(buf: B) -> Self {
        Self::from_parts(buf, AmfGraph::new(), DecodeTables::default(), None)
    }

    pub(crate) fn from_parts(
        buf: B,
        graph: AmfGraph,
        tables: DecodeTables,
        registry: Option<Arc<dyn ClassRegistry>>,
    ) -> Self {
        Self {
            buf,
            graph,
            tables,
            registry,
        }
    }

    pub(crate) fn into_parts(self) -> (AmfGraph, DecodeTables) {
        (self.graph, self.tables)
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
        self.buf.has_remaining()
    }

    /// Clears the string, trait and object tables.
    pub fn reset_references(&mut self) {
        self.tables = DecodeTables::default();
    }

    /// Decode the next value.
    ///
    /// Unknown marker bytes are skipped.
    pub fn decode_value(&mut self) -> Result<AmfValue> {
        let marker = loop {
            let byte = self.buf.take_u8()?;
            match Amf3Marker::from_u8(byte) {
                Some(marker) => break marker,
                None => tracing::debug!(marker = byte, "skipping unknown amf3 marker"),
            }
        };

        match marker {
            Amf3Marker::Undefined => Ok(AmfValue::Undefined),
            Amf3Marker::Null => Ok(AmfValue::Null),
            Amf3Marker::False => Ok(AmfValue::Boolean(false)),
            Amf3Marker::True => Ok(AmfValue::Boolean(true)),
            Amf3Marker::Integer => Ok(AmfValue::Integer(read_i29(&mut self.buf)?)),
            Amf3Marker::Double => Ok(AmfValue::Number(self.buf.take_f64()?)),
            Amf3Marker::String => self.read_string().map(AmfValue::String),
            Amf3Marker::XmlDocument => self.decode_xml(AmfValue::XmlDocument),
            Amf3Marker::Xml => self.decode_xml(AmfValue::Xml),
            Amf3Marker::Date => self.decode_date(),
            Amf3Marker::Array => self.decode_array(),
            Amf3Marker::Object => self.decode_object(),
            Amf3Marker::ByteArray => self.decode_byte_array(),
            Amf3Marker::VectorInt => self.decode_vector(Amf3Marker::VectorInt),
            Amf3Marker::VectorUInt => self.decode_vector(Amf3Marker::VectorUInt),
            Amf3Marker::VectorDouble => self.decode_vector(Amf3Marker::VectorDouble),
            Amf3Marker::VectorObject => self.decode_object_vector(),
            Amf3Marker::Dictionary => Err(AmfError::UnsupportedMarker(marker as u8)),
        }
    }

    /// Decode all values from the buffer until the end.
    pub fn decode_all(&mut self) -> Result<Vec<AmfValue>> {
        let mut values = Vec::new();

        while self.buf.has_remaining() {
            values.push(self.decode_value()?);
        }

        Ok(values)
    }

    /// Decode the next value and convert it with [`FromAmf`].
    pub fn decode<T: FromAmf>(&mut self) -> Result<T> {
        let value = self.decode_value()?;
        T::from_amf(&self.graph, &value)
    }

    /// AMF3 has no standalone reference value, references are part of the
    /// header of each composite value.
    pub fn decode_reference(&mut self) -> Result<AmfValue> {
        Err(AmfError::UnsupportedOperation("amf3 has no reference value"))
    }

    fn object_reference(&self, index: usize) -> Result<AmfValue> {
        self.tables
            .objects
            .get(index)
            .cloned()
            .ok_or(AmfError::InvalidReference { table: "object", index })
    }

    /// Capacity hint that cannot exceed what the buffer can hold.
    fn capacity(&self, count: u32, element_size: usize) -> usize {
        (count as usize).min(self.buf.remaining() / element_size.max(1))
    }

    fn read_utf8(&mut self, len: u32) -> Result<String> {
        let bytes = self.buf.take_bytes(len as usize)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn read_string(&mut self) -> Result<String> {
        match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => self
                .tables
                .strings
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference { table: "string", index }),
            RefOrValue::Inline(0) => Ok(String::new()),
            RefOrValue::Inline(len) => {
                let value = self.read_utf8(len)?;
                self.tables.strings.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_xml(&mut self, kind: fn(String) -> AmfValue) -> Result<AmfValue> {
        match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => self.object_reference(index),
            RefOrValue::Inline(len) => {
                let value = kind(self.read_utf8(len)?);
                self.tables.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_date(&mut self) -> Result<AmfValue> {
        match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => self.object_reference(index),
            RefOrValue::Inline(_) => {
                let value = AmfValue::Date(self.buf.take_f64()?);
                self.tables.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_array(&mut self) -> Result<AmfValue> {
        let count = match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => return self.object_reference(index),
            RefOrValue::Inline(count) => count,
        };

        let slot = self.graph.reserve();
        self.tables.objects.push(AmfValue::Ref(slot));

        let mut assoc = Vec::new();
        loop {
            let key = self.read_string()?;
            if key.is_empty() {
                break;
            }

            let value = self.decode_value()?;
            assoc.push((key, value));
        }

        let mut dense = Vec::with_capacity(self.capacity(count, 1));
        for _ in 0..count {
            dense.push(self.decode_value()?);
        }

        self.graph.complete(slot, AmfNode::Array(AmfArray { dense, assoc }));
        Ok(AmfValue::Ref(slot))
    }

    fn read_traits(&mut self, header: u32) -> Result<Arc<TraitDescriptor>> {
        if header & 0b10 == 0 {
            let index = (header >> 2) as usize;
            return self
                .tables
                .traits
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference { table: "trait", index });
        }

        let flags = header >> 2;
        let kind = match (flags & 0b01 != 0, flags & 0b10 != 0) {
            (false, false) => TraitKind::Sealed,
            (false, true) => TraitKind::Dynamic,
            (true, false) => TraitKind::Externalizable,
            (true, true) => TraitKind::Proxy,
        };
        let count = flags >> 2;

        let class_name = self.read_string()?;
        let mut sealed = Vec::new();
        if !kind.is_externalizable() {
            sealed.reserve(self.capacity(count, 1));
            for _ in 0..count {
                sealed.push(self.read_string()?);
            }
        }

        let traits = Arc::new(TraitDescriptor {
            class_name,
            kind,
            sealed,
        });
        self.tables.traits.push(traits.clone());

        Ok(traits)
    }

    fn decode_object(&mut self) -> Result<AmfValue> {
        let header = read_u29(&mut self.buf)?;
        if header & 1 == 0 {
            return self.object_reference((header >> 1) as usize);
        }

        let traits = self.read_traits(header)?;

        let slot = self.graph.reserve();
        self.tables.objects.push(AmfValue::Ref(slot));

        if traits.kind.is_externalizable() {
            let instantiation = || AmfError::Instantiation {
                class: traits.class_name.clone(),
            };
            let registry = self.registry.clone().ok_or_else(instantiation)?;
            let mut instance = registry.new_instance(&traits.class_name).ok_or_else(instantiation)?;

            instance.read_external(&mut DataInput::new(self))?;
            self.graph.complete(slot, AmfNode::Instance(instance));

            return Ok(AmfValue::Ref(slot));
        }

        let mut properties = Vec::with_capacity(traits.sealed.len());
        for name in &traits.sealed {
            let value = self.decode_value()?;
            properties.push((name.clone(), value));
        }

        if traits.kind.is_dynamic() {
            // Some encoders end the payload without the closing empty key.
            while self.buf.has_remaining() {
                let key = self.read_string()?;
                if key.is_empty() {
                    break;
                }

                let value = self.decode_value()?;
                properties.push((key, value));
            }
        }

        self.graph.materialize(slot, traits, properties, self.registry.as_deref())?;
        Ok(AmfValue::Ref(slot))
    }

    fn decode_byte_array(&mut self) -> Result<AmfValue> {
        match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => self.object_reference(index),
            RefOrValue::Inline(len) => {
                let bytes = self.buf.take_bytes(len as usize)?;
                let id = self.graph.insert(bytes);
                self.tables.objects.push(AmfValue::Ref(id));
                Ok(AmfValue::Ref(id))
            }
        }
    }

    fn decode_vector(&mut self, marker: Amf3Marker) -> Result<AmfValue> {
        let count = match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => return self.object_reference(index),
            RefOrValue::Inline(count) => count,
        };
        let fixed = self.buf.take_u8()? != 0;

        let node = match marker {
            Amf3Marker::VectorInt => {
                let mut items = Vec::with_capacity(self.capacity(count, 4));
                for _ in 0..count {
                    items.push(self.buf.take_i32()?);
                }
                AmfNode::VectorInt(AmfVector { fixed, items })
            }
            Amf3Marker::VectorUInt => {
                let mut items = Vec::with_capacity(self.capacity(count, 4));
                for _ in 0..count {
                    items.push(self.buf.take_u32()?);
                }
                AmfNode::VectorUInt(AmfVector { fixed, items })
            }
            _ => {
                let mut items = Vec::with_capacity(self.capacity(count, 8));
                for _ in 0..count {
                    items.push(self.buf.take_f64()?);
                }
                AmfNode::VectorNumber(AmfVector { fixed, items })
            }
        };

        let id = self.graph.insert(node);
        self.tables.objects.push(AmfValue::Ref(id));
        Ok(AmfValue::Ref(id))
    }

    fn decode_object_vector(&mut self) -> Result<AmfValue> {
        let count = match RefOrValue::read(&mut self.buf)? {
            RefOrValue::Reference(index) => return self.object_reference(index),
            RefOrValue::Inline(count) => count,
        };
        let fixed = self.buf.take_u8()? != 0;
        let type_name = self.read_string()?;

        let slot = self.graph.reserve();
        self.tables.objects.push(AmfValue::Ref(slot));

        let mut items = Vec::with_capacity(self.capacity(count, 1));
        for _ in 0..count {
            items.push(self.decode_value()?);
        }

        self.graph.complete(
            slot,
            AmfNode::VectorObject(AmfObjectVector {
                type_name,
                fixed,
                items,
            }),
        );
        Ok(AmfValue::Ref(slot))
    }
}

impl<B: Buf> ExternalSource for Amf3Decoder<B> {
    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        Ok(self.buf.take_bytes(len)?)
    }

    fn read_value(&mut self) -> Result<AmfValue> {
        self.decode_value()
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;
    use crate::class::TypeRegistry;
    use crate::class::tests::{Person, Point};

    fn decoder(bytes: &[u8]) -> Amf3Decoder<&[u8]> {
        Amf3Decoder::new(bytes)
    }

    #[test]
    fn scalars() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::Undefined as u8,
            Amf3Marker::Null as u8,
            Amf3Marker::False as u8,
            Amf3Marker::True as u8,
            Amf3Marker::Integer as u8, 0xff, 0xff, 0xff, 0xff,
            Amf3Marker::Double as u8, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0,
            Amf3Marker::String as u8, 0x07, b'a', b'b', b'c',
            Amf3Marker::String as u8, 0x00,
            Amf3Marker::String as u8, 0x01,
        ];

        let values = decoder(&bytes).decode_all().unwrap();
        assert_eq!(
            values,
            [
                AmfValue::Undefined,
                AmfValue::Null,
                AmfValue::Boolean(false),
                AmfValue::Boolean(true),
                AmfValue::Integer(-1),
                AmfValue::Number(1.5),
                AmfValue::String("abc".into()),
                AmfValue::String("abc".into()),
                AmfValue::String(String::new()),
            ]
        );
    }

    #[test]
    fn vector_int() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::VectorInt as u8, 0x09, 0x00,
            0x00, 0x00, 0x00, 0x02,
            0x00, 0x00, 0x07, 0xd0,
            0x7f, 0xff, 0xff, 0xff,
            0x80, 0x00, 0x00, 0x00,
        ];

        let mut decoder = decoder(&bytes);
        let value = decoder.decode_value().unwrap();
        assert_eq!(
            decoder.graph().resolve(&value),
            Some(&AmfNode::VectorInt(AmfVector {
                fixed: false,
                items: vec![2, 2000, i32::MAX, i32::MIN],
            }))
        );
    }

    #[test]
    fn vector_uint() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::VectorUInt as u8, 0x09, 0x00,
            0x00, 0x00, 0x00, 0x02,
            0x00, 0x00, 0x07, 0xd0,
            0xff, 0xff, 0xff, 0xff,
            0x00, 0x00, 0x00, 0x00,
        ];

        let mut decoder = decoder(&bytes);
        let items: Vec<u32> = decoder.decode().unwrap();
        assert_eq!(items, [2, 2000, u32::MAX, 0]);
    }

    #[test]
    fn vector_object() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::VectorObject as u8, 0x05, 0x00, 0x01,
            Amf3Marker::String as u8, 0x09, b'P', b'a', b'u', b'l',
            Amf3Marker::String as u8, 0x01,
        ];

        let mut decoder = decoder(&bytes);
        let value = decoder.decode_value().unwrap();
        assert_eq!(
            decoder.graph().resolve(&value),
            Some(&AmfNode::VectorObject(AmfObjectVector {
                type_name: String::new(),
                fixed: false,
                items: vec![AmfValue::from("Paul"), AmfValue::from("")],
            }))
        );
    }

    #[test]
    fn dynamic_object_with_cycle() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::Object as u8, 0x0b, 0x01,
            0x05, b'm', b'e', Amf3Marker::Object as u8, 0x00,
            0x01,
        ];

        let mut decoder = decoder(&bytes);
        let value = decoder.decode_value().unwrap();
        let object = decoder.graph().object(&value).unwrap();

        assert!(object.traits().is_anonymous());
        assert_eq!(object.get("me"), Some(&value));
    }

    #[test]
    fn trait_and_string_references() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::Array as u8, 0x05, 0x01,
            Amf3Marker::Object as u8, 0x0b, 0x01, 0x03, b'a', Amf3Marker::Integer as u8, 0x01, 0x01,
            Amf3Marker::Object as u8, 0x01, 0x00, Amf3Marker::Integer as u8, 0x02, 0x01,
            Amf3Marker::Array as u8, 0x00,
        ];

        let mut decoder = decoder(&bytes);
        let list = decoder.decode_value().unwrap();
        let again = decoder.decode_value().unwrap();
        assert_eq!(list, again);

        let graph = decoder.graph();
        let array = graph.array(&list).unwrap();
        assert!(array.is_dense());

        let first = graph.object(&array.dense[0]).unwrap();
        let second = graph.object(&array.dense[1]).unwrap();
        assert!(Arc::ptr_eq(first.traits(), second.traits()));
        assert_eq!(second.get("a"), Some(&AmfValue::Integer(2)));
    }

    #[test]
    fn associative_array() {
        #[rustfmt::skip]
        let bytes = [
            Amf3Marker::Array as u8, 0x03,
            0x03, b'k', Amf3Marker::True as u8,
            0x01,
            Amf3Marker::Integer as u8, 0x07,
        ];

        let mut decoder = decoder(&bytes);
        let value = decoder.decode_value().unwrap();
        let array = decoder.graph().array(&value).unwrap();
        assert_eq!(array.dense, [AmfValue::Integer(7)]);
        assert_eq!(array.assoc, [("k".to_owned(), AmfValue::Boolean(true))]);
    }

    #[test]
    fn dates_share_the_object_table() {
        let mut bytes = vec![Amf3Marker::Array as u8, 0x05, 0x01, Amf3Marker::Date as u8, 0x01];
        bytes.extend_from_slice(&1_000.0f64.to_be_bytes());
        bytes.extend_from_slice(&[Amf3Marker::Date as u8, 0x02]);

        let mut decoder = decoder(&bytes);
        let value = decoder.decode_value().unwrap();
        let array = decoder.graph().array(&value).unwrap();
        assert_eq!(array.dense, [AmfValue::Date(1_000.0), AmfValue::Date(1_000.0)]);
    }

    #[test]
    fn sealed_instance() {
        let mut registry = TypeRegistry::new();
        registry.register::<Person>("com.example.Person");

        let mut bytes = vec![Amf3Marker::Object as u8, 0x33, 0x25];
        bytes.extend_from_slice(b"com.example.Person");
        bytes.extend_from_slice(b"\x09name\x07age\x0dfriend");
        bytes.extend_from_slice(&[Amf3Marker::String as u8, 0x0b]);
        bytes.extend_from_slice(b"alice");
        bytes.extend_from_slice(&[Amf3Marker::Integer as u8, 0x1e, Amf3Marker::Null as u8]);

        let mut decoder = Amf3Decoder::new(bytes.as_slice()).with_registry(Arc::new(registry));
        let value = decoder.decode_value().unwrap();
        let person = decoder.graph().instance::<Person>(value.node().unwrap()).unwrap();
        assert_eq!(
            person,
            &Person {
                name: "alice".into(),
                age: 30,
                friend: None,
            }
        );

        // The same payload without a registry stays a generic object.
        let mut decoder = Amf3Decoder::new(bytes.as_slice());
        let value = decoder.decode_value().unwrap();
        let object = decoder.graph().object(&value).unwrap();
        assert_eq!(object.class_name(), "com.example.Person");
        assert_eq!(object.get("age"), Some(&AmfValue::Integer(30)));
    }

    #[test]
    fn unknown_class_with_registry() {
        let mut bytes = vec![Amf3Marker::Object as u8, 0x0b, 0x11];
        bytes.extend_from_slice(b"nope.Foo");
        bytes.push(0x01);

        let mut decoder = Amf3Decoder::new(bytes.as_slice()).with_registry(Arc::new(TypeRegistry::new()));
        assert!(matches!(
            decoder.decode_value(),
            Err(AmfError::Instantiation { class }) if class == "nope.Foo"
        ));
    }

    #[test]
    fn externalizable_instance() {
        let mut registry = TypeRegistry::new();
        registry.register::<Point>("com.example.Point");

        let mut bytes = vec![Amf3Marker::Object as u8, 0x07, 0x23];
        bytes.extend_from_slice(b"com.example.Point");
        bytes.extend_from_slice(&1.5f64.to_be_bytes());
        bytes.extend_from_slice(&(-2.0f64).to_be_bytes());
        bytes.extend_from_slice(b"\x00\x02hi");

        let mut decoder = Amf3Decoder::new(bytes.as_slice()).with_registry(Arc::new(registry));
        let value = decoder.decode_value().unwrap();
        let point = decoder.graph().instance::<Point>(value.node().unwrap()).unwrap();
        assert_eq!(
            point,
            &Point {
                x: 1.5,
                y: -2.0,
                label: "hi".into(),
            }
        );
        assert!(!decoder.has_remaining());

        // Externalizable bodies cannot be skipped without the class.
        let mut decoder = Amf3Decoder::new(bytes.as_slice());
        assert!(matches!(decoder.decode_value(), Err(AmfError::Instantiation { .. })));
    }

    #[test]
    fn errors() {
        assert!(matches!(
            decoder(&[Amf3Marker::Dictionary as u8]).decode_value(),
            Err(AmfError::UnsupportedMarker(0x11))
        ));
        assert!(matches!(
            decoder(&[Amf3Marker::String as u8, 0x02]).decode_value(),
            Err(AmfError::InvalidReference { table: "string", index: 1 })
        ));
        assert!(matches!(
            decoder(&[Amf3Marker::Object as u8, 0x04]).decode_value(),
            Err(AmfError::InvalidReference { table: "object", index: 2 })
        ));
        assert!(matches!(
            decoder(&[Amf3Marker::String as u8, 0x0b, b'a']).decode_value(),
            Err(AmfError::TruncatedInput {
                requested: 5,
                available: 1
            })
        ));
        assert!(matches!(
            decoder(&[]).decode_reference(),
            Err(AmfError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn unknown_markers_are_skipped() {
        let mut decoder = decoder(&[0x42, 0x13, Amf3Marker::Integer as u8, 0x05]);
        assert_eq!(decoder.decode_value().unwrap(), AmfValue::Integer(5));
    }
}
