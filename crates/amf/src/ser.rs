//! Serialize decoded AMF values with [serde].

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde::Serialize;
use serde::ser::{SerializeMap, SerializeSeq};

use crate::graph::{AmfGraph, AmfNode, NodeId};
use crate::value::AmfValue;

/// A [`Serialize`] view of a value and the graph it points into.
///
/// Objects, associative arrays and instances serialize as maps, every list kind
/// as a sequence and byte arrays as bytes. A node that is reached again while
/// it is still being serialized is written as a unit value.
#[derive(Debug, Clone)]
pub struct SerializeValue<'a> {
    graph: &'a AmfGraph,
    value: &'a AmfValue,
    visiting: Rc<RefCell<HashSet<NodeId>>>,
}

impl<'a> SerializeValue<'a> {
    pub(crate) fn new(graph: &'a AmfGraph, value: &'a AmfValue) -> Self {
        Self {
            graph,
            value,
            visiting: Rc::default(),
        }
    }

    fn child<'b>(&self, value: &'b AmfValue) -> SerializeValue<'b>
    where
        'a: 'b,
    {
        SerializeValue {
            graph: self.graph,
            value,
            visiting: self.visiting.clone(),
        }
    }

    fn serialize_node<S: serde::Serializer>(&self, node: &AmfNode, serializer: S) -> Result<S::Ok, S::Error> {
        match node {
            AmfNode::Pending => serializer.serialize_unit(),
            AmfNode::Object(object) => {
                let mut map = serializer.serialize_map(Some(object.len()))?;
                for (key, value) in object.iter() {
                    map.serialize_entry(key, &self.child(value))?;
                }
                map.end()
            }
            AmfNode::Array(array) if array.is_dense() => {
                let mut seq = serializer.serialize_seq(Some(array.dense.len()))?;
                for value in &array.dense {
                    seq.serialize_element(&self.child(value))?;
                }
                seq.end()
            }
            AmfNode::Array(array) => {
                let mut map = serializer.serialize_map(Some(array.dense.len() + array.assoc.len()))?;
                for (index, value) in array.dense.iter().enumerate() {
                    map.serialize_entry(&index.to_string(), &self.child(value))?;
                }
                for (key, value) in &array.assoc {
                    map.serialize_entry(key, &self.child(value))?;
                }
                map.end()
            }
            AmfNode::EcmaArray(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(&key.to_string(), &self.child(value))?;
                }
                map.end()
            }
            AmfNode::ByteArray(bytes) => serializer.serialize_bytes(bytes),
            AmfNode::VectorInt(vector) => vector.items.serialize(serializer),
            AmfNode::VectorUInt(vector) => vector.items.serialize(serializer),
            AmfNode::VectorNumber(vector) => vector.items.serialize(serializer),
            AmfNode::VectorObject(vector) => {
                let mut seq = serializer.serialize_seq(Some(vector.items.len()))?;
                for value in &vector.items {
                    seq.serialize_element(&self.child(value))?;
                }
                seq.end()
            }
            AmfNode::Instance(instance) => {
                let traits = instance.traits();
                let mut map = serializer.serialize_map(Some(traits.sealed.len()))?;
                for name in &traits.sealed {
                    let value = instance.get_property(name).unwrap_or(AmfValue::Undefined);
                    map.serialize_entry(name, &self.child(&value))?;
                }
                map.end()
            }
        }
    }
}

impl Serialize for SerializeValue<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            AmfValue::Undefined | AmfValue::Null => serializer.serialize_none(),
            AmfValue::Boolean(value) => serializer.serialize_bool(*value),
            AmfValue::Number(value) | AmfValue::Date(value) => serializer.serialize_f64(*value),
            AmfValue::Integer(value) => serializer.serialize_i32(*value),
            AmfValue::String(value) | AmfValue::XmlDocument(value) | AmfValue::Xml(value) => serializer.serialize_str(value),
            AmfValue::Ref(id) => {
                let Some(node) = self.graph.get(*id) else {
                    return serializer.serialize_unit();
                };

                if !self.visiting.borrow_mut().insert(*id) {
                    return serializer.serialize_unit();
                }

                let result = self.serialize_node(node, serializer);
                self.visiting.borrow_mut().remove(id);
                result
            }
        }
    }
}
