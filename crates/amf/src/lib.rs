//! A pure-rust implementation of AMF0 and AMF3 encoders and decoders.
//!
//! Decoded composite values (objects, arrays, byte arrays and vectors) are
//! stored in an [`AmfGraph`] and referenced by [`AmfValue::Ref`]. This keeps
//! shared references and cycles intact without reference counting.
//!
//! # Limitations
//!
//! - AMF3 dictionaries are not supported.
//! - Movie clips and record sets are reserved markers and fail to decode.
//!
//! # Examples
//!
//! ```rust
//! # fn test() -> Result<(), Box<dyn std::error::Error>> {
//! use scuffle_amf::{Amf0Decoder, Amf0Encoder, AmfGraph, AmfMap, AmfValue};
//!
//! let mut graph = AmfGraph::new();
//! let map: AmfMap = [("width", 1280.0), ("height", 720.0)].into_iter().collect();
//! let id = graph.insert(map);
//!
//! // Encode a value into a writer
//! let mut encoder = Amf0Encoder::new(Vec::new());
//! encoder.encode_string("onMetaData")?;
//! encoder.encode_value(&graph, &AmfValue::Ref(id))?;
//! let bytes = encoder.into_inner();
//!
//! // Decode it again
//! let mut decoder = Amf0Decoder::new(bytes.as_slice());
//! assert_eq!(decoder.decode_string()?, "onMetaData");
//! let value = decoder.decode_value()?;
//! let map = decoder.graph().ecma_array(&value).unwrap();
//! assert_eq!(map.get_str("width"), Some(&AmfValue::Number(1280.0)));
//! # Ok(())
//! # }
//! # test().expect("test failed");
//! ```
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(unreachable_pub)]

pub mod amf0;
pub mod amf3;
pub mod cache;
pub mod class;
pub mod convert;
pub mod error;
pub mod graph;
#[cfg(feature = "serde")]
mod ser;
pub mod u29;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder, Amf0Marker};
pub use amf3::{Amf3Decoder, Amf3Encoder, Amf3Marker};
pub use cache::AmfCache;
pub use class::{AmfClass, ClassRegistry, DataInput, DataOutput, TypeRegistry};
pub use convert::FromAmf;
pub use error::{AmfError, Result};
pub use graph::{AmfGraph, AmfNode, NodeId};
#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub use ser::SerializeValue;
pub use value::{
    AmfArray, AmfKey, AmfMap, AmfObject, AmfObjectVector, AmfValue, AmfVector, TraitDescriptor, TraitKind,
};
