//! Arena holding the composite values of a decoded or to-be-encoded payload.
//!
//! Composite values refer to each other by [`NodeId`], so shared references
//! and cycles need no back pointers. Decoders reserve a [`AmfNode::Pending`]
//! slot before reading the members of a composite value. A member that points
//! back at the slot simply stores its id, and the slot is replaced once the
//! value is complete.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::class::{AmfClass, ClassRegistry};
use crate::error::{AmfError, Result};
use crate::value::{AmfArray, AmfMap, AmfObject, AmfObjectVector, AmfValue, AmfVector, TraitDescriptor};

/// Index of a node inside an [`AmfGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A composite value.
#[derive(Debug)]
pub enum AmfNode {
    /// Reserved while the value is still being decoded.
    Pending,
    /// An object with generic properties.
    Object(AmfObject),
    /// A strict array or an AMF3 array.
    Array(AmfArray),
    /// An AMF0 associative array.
    EcmaArray(AmfMap),
    /// An AMF3 byte array.
    ByteArray(Bytes),
    /// `Vector.<int>`
    VectorInt(AmfVector<i32>),
    /// `Vector.<uint>`
    VectorUInt(AmfVector<u32>),
    /// `Vector.<Number>`
    VectorNumber(AmfVector<f64>),
    /// `Vector.<Object>`
    VectorObject(AmfObjectVector),
    /// An instance created through a [`ClassRegistry`].
    Instance(Box<dyn AmfClass>),
}

impl AmfNode {
    /// Name of the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::EcmaArray(_) => "ecma array",
            Self::ByteArray(_) => "byte array",
            Self::VectorInt(_) => "vector int",
            Self::VectorUInt(_) => "vector uint",
            Self::VectorNumber(_) => "vector number",
            Self::VectorObject(_) => "vector object",
            Self::Instance(_) => "instance",
        }
    }
}

impl PartialEq for AmfNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pending, Self::Pending) => true,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::EcmaArray(a), Self::EcmaArray(b)) => a == b,
            (Self::ByteArray(a), Self::ByteArray(b)) => a == b,
            (Self::VectorInt(a), Self::VectorInt(b)) => a == b,
            (Self::VectorUInt(a), Self::VectorUInt(b)) => a == b,
            (Self::VectorNumber(a), Self::VectorNumber(b)) => a == b,
            (Self::VectorObject(a), Self::VectorObject(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => {
                let traits = a.traits();
                traits == b.traits() && traits.sealed.iter().all(|name| a.get_property(name) == b.get_property(name))
            }
            _ => false,
        }
    }
}

impl From<AmfObject> for AmfNode {
    fn from(value: AmfObject) -> Self {
        Self::Object(value)
    }
}

impl From<AmfArray> for AmfNode {
    fn from(value: AmfArray) -> Self {
        Self::Array(value)
    }
}

impl From<AmfMap> for AmfNode {
    fn from(value: AmfMap) -> Self {
        Self::EcmaArray(value)
    }
}

impl From<Bytes> for AmfNode {
    fn from(value: Bytes) -> Self {
        Self::ByteArray(value)
    }
}

impl From<Box<dyn AmfClass>> for AmfNode {
    fn from(value: Box<dyn AmfClass>) -> Self {
        Self::Instance(value)
    }
}

#[derive(Debug, Default)]
struct PendingObject {
    /// Instance properties that must be set once the slot is materialized.
    assignments: Vec<(NodeId, String)>,
}

/// Arena of composite values.
#[derive(Debug, Default)]
pub struct AmfGraph {
    nodes: Vec<AmfNode>,
    pending: HashMap<NodeId, PendingObject>,
}

impl AmfGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id.
    pub fn insert(&mut self, node: impl Into<AmfNode>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node.into());
        id
    }

    /// Looks up a node.
    pub fn get(&self, id: NodeId) -> Option<&AmfNode> {
        self.nodes.get(id.0)
    }

    /// Looks up a node mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut AmfNode> {
        self.nodes.get_mut(id.0)
    }

    /// Follows a [`AmfValue::Ref`].
    pub fn resolve(&self, value: &AmfValue) -> Option<&AmfNode> {
        value.node().and_then(|id| self.get(id))
    }

    /// The object behind `value`, if it is one.
    pub fn object(&self, value: &AmfValue) -> Option<&AmfObject> {
        match self.resolve(value)? {
            AmfNode::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The array behind `value`, if it is one.
    pub fn array(&self, value: &AmfValue) -> Option<&AmfArray> {
        match self.resolve(value)? {
            AmfNode::Array(array) => Some(array),
            _ => None,
        }
    }

    /// The associative array behind `value`, if it is one.
    pub fn ecma_array(&self, value: &AmfValue) -> Option<&AmfMap> {
        match self.resolve(value)? {
            AmfNode::EcmaArray(map) => Some(map),
            _ => None,
        }
    }

    /// Downcasts the instance at `id`.
    pub fn instance<T: AmfClass + 'static>(&self, id: NodeId) -> Option<&T> {
        match self.get(id)? {
            AmfNode::Instance(instance) => (**instance).as_any().downcast_ref(),
            _ => None,
        }
    }

    /// Downcasts the instance at `id` mutably.
    pub fn instance_mut<T: AmfClass + 'static>(&mut self, id: NodeId) -> Option<&mut T> {
        match self.get_mut(id)? {
            AmfNode::Instance(instance) => (**instance).as_any_mut().downcast_mut(),
            _ => None,
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` is still being decoded.
    pub fn is_pending(&self, id: NodeId) -> bool {
        matches!(self.get(id), Some(AmfNode::Pending))
    }

    pub(crate) fn reserve(&mut self) -> NodeId {
        self.insert(AmfNode::Pending)
    }

    /// Fills a reserved slot and runs the assignments that waited for it.
    pub(crate) fn complete(&mut self, slot: NodeId, node: AmfNode) {
        if let Some(entry) = self.nodes.get_mut(slot.0) {
            *entry = node;
        }

        let Some(pending) = self.pending.remove(&slot) else {
            return;
        };

        for (target, name) in pending.assignments {
            match self.nodes.get_mut(target.0) {
                Some(AmfNode::Instance(instance)) => {
                    if let Err(err) = instance.set_property(&name, AmfValue::Ref(slot)) {
                        tracing::warn!(property = %name, error = %err, "skipping deferred property");
                    }
                }
                Some(AmfNode::Object(object)) => {
                    object.insert(name, AmfValue::Ref(slot));
                }
                _ => {}
            }
        }
    }

    /// Turns decoded properties into the node for `slot`.
    ///
    /// Without a registry, or for anonymous objects, this is a generic
    /// [`AmfObject`]. Otherwise the registry must know the class. Properties
    /// the instance rejects are logged and skipped. Properties pointing at a
    /// slot that is still pending are assigned once that slot completes.
    pub(crate) fn materialize(
        &mut self,
        slot: NodeId,
        traits: Arc<TraitDescriptor>,
        properties: Vec<(String, AmfValue)>,
        registry: Option<&dyn ClassRegistry>,
    ) -> Result<()> {
        let registry = match registry {
            Some(registry) if !traits.is_anonymous() => registry,
            _ => {
                self.complete(slot, AmfNode::Object(AmfObject::from_parts(traits, properties)));
                return Ok(());
            }
        };

        let mut instance = registry.new_instance(&traits.class_name).ok_or_else(|| AmfError::Instantiation {
            class: traits.class_name.clone(),
        })?;

        for (name, value) in properties {
            if let AmfValue::Ref(target) = value {
                if target != slot && self.is_pending(target) {
                    self.pending.entry(target).or_default().assignments.push((slot, name));
                    continue;
                }
            }

            if let Err(err) = instance.set_property(&name, value) {
                tracing::warn!(class = %traits.class_name, property = %name, error = %err, "skipping property");
            }
        }

        self.complete(slot, AmfNode::Instance(instance));
        Ok(())
    }

    /// A [`serde::Serialize`] view of `value`.
    ///
    /// A node that is reached again while it is being serialized (a cycle)
    /// is written as a unit value.
    #[cfg(feature = "serde")]
    pub fn serializable<'a>(&'a self, value: &'a AmfValue) -> crate::ser::SerializeValue<'a> {
        crate::ser::SerializeValue::new(self, value)
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;
    use crate::class::tests::Person;
    use crate::class::TypeRegistry;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register::<Person>("com.example.Person");
        registry
    }

    #[test]
    fn self_reference_is_an_index() {
        let mut graph = AmfGraph::new();
        let id = graph.insert(AmfObject::new());
        if let Some(AmfNode::Object(object)) = graph.get_mut(id) {
            object.insert("me", AmfValue::Ref(id));
        }

        let object = graph.object(&AmfValue::Ref(id)).unwrap();
        assert_eq!(object.get("me"), Some(&AmfValue::Ref(id)));
    }

    #[test]
    fn materialize_generic_without_registry() {
        let mut graph = AmfGraph::new();
        let slot = graph.reserve();
        assert!(graph.is_pending(slot));

        let traits = Arc::new(TraitDescriptor::dynamic("com.example.Person"));
        graph
            .materialize(slot, traits, vec![("name".into(), "bob".into())], None)
            .unwrap();

        let object = graph.object(&AmfValue::Ref(slot)).unwrap();
        assert_eq!(object.class_name(), "com.example.Person");
        assert_eq!(object.get("name"), Some(&AmfValue::String("bob".into())));
    }

    #[test]
    fn materialize_instance_skips_bad_properties() {
        let registry = registry();
        let mut graph = AmfGraph::new();
        let slot = graph.reserve();

        let traits = Arc::new(TraitDescriptor::dynamic("com.example.Person"));
        let properties = vec![
            ("name".to_owned(), AmfValue::from("alice")),
            ("age".to_owned(), AmfValue::from("not a number")),
            ("nickname".to_owned(), AmfValue::from("al")),
        ];
        graph.materialize(slot, traits, properties, Some(&registry)).unwrap();

        let person = graph.instance::<Person>(slot).unwrap();
        assert_eq!(person.name, "alice");
        assert_eq!(person.age, 0);
    }

    #[test]
    fn materialize_unknown_class() {
        let registry = registry();
        let mut graph = AmfGraph::new();
        let slot = graph.reserve();

        let err = graph
            .materialize(slot, Arc::new(TraitDescriptor::dynamic("com.example.Nope")), Vec::new(), Some(&registry))
            .unwrap_err();
        assert!(matches!(err, AmfError::Instantiation { class } if class == "com.example.Nope"));
    }

    #[test]
    fn deferred_assignment_runs_on_completion() {
        let registry = registry();
        let mut graph = AmfGraph::new();
        let parent = graph.reserve();
        let child = graph.reserve();

        let traits = Arc::new(TraitDescriptor::dynamic("com.example.Person"));
        graph
            .materialize(
                child,
                traits.clone(),
                vec![("friend".into(), AmfValue::Ref(parent))],
                Some(&registry),
            )
            .unwrap();
        assert_eq!(graph.instance::<Person>(child).unwrap().friend, None);

        graph
            .materialize(parent, traits, vec![("friend".into(), AmfValue::Ref(child))], Some(&registry))
            .unwrap();

        assert_eq!(graph.instance::<Person>(child).unwrap().friend, Some(parent));
        assert_eq!(graph.instance::<Person>(parent).unwrap().friend, Some(child));
    }
}
