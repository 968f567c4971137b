//! Typed objects.
//!
//! Application types take part in encoding and decoding by implementing
//! [`AmfClass`], which describes the type's traits and gives access to its
//! properties. A [`ClassRegistry`] turns class names from the wire into fresh
//! instances.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use scuffle_bytes_util::BufExt;

use crate::error::{AmfError, Result};
use crate::value::{AmfValue, TraitDescriptor};

/// Access to [`Any`] for trait objects.
pub trait AsAny {
    /// Upcasts to [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Upcasts to [`Any`] mutably.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A type that can be encoded as a typed AMF object.
///
/// [`traits`](AmfClass::traits) must return the same descriptor for every
/// instance of a type, encoders may cache it per type.
pub trait AmfClass: AsAny + fmt::Debug + Send {
    /// Class alias, layout and sealed property names.
    fn traits(&self) -> TraitDescriptor;

    /// Reads a property for encoding.
    fn get_property(&self, name: &str) -> Option<AmfValue> {
        let _ = name;
        None
    }

    /// Assigns a decoded property.
    ///
    /// Returning an error skips the property, decoding continues.
    fn set_property(&mut self, name: &str, value: AmfValue) -> Result<()> {
        let _ = value;
        Err(AmfError::PropertyAssignment {
            property: name.to_owned(),
            reason: "unknown property".into(),
        })
    }

    /// Reads the body of an externalizable object.
    fn read_external(&mut self, input: &mut DataInput<'_>) -> Result<()> {
        let _ = input;
        Err(AmfError::UnsupportedOperation("read_external"))
    }

    /// Writes the body of an externalizable object.
    fn write_external(&self, output: &mut DataOutput<'_>) -> Result<()> {
        let _ = output;
        Err(AmfError::UnsupportedOperation("write_external"))
    }
}

/// Creates instances by class name.
pub trait ClassRegistry: Send + Sync {
    /// Returns a fresh instance, or `None` for unknown classes.
    fn new_instance(&self, class_name: &str) -> Option<Box<dyn AmfClass>>;
}

type Factory = Box<dyn Fn() -> Box<dyn AmfClass> + Send + Sync>;

/// A [`ClassRegistry`] backed by a map of factories.
#[derive(Default)]
pub struct TypeRegistry {
    factories: HashMap<String, Factory>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `class_name`, creating instances with [`Default`].
    pub fn register<T: AmfClass + Default + 'static>(&mut self, class_name: impl Into<String>) -> &mut Self {
        self.register_with(class_name, || Box::new(T::default()))
    }

    /// Registers a factory under `class_name`.
    pub fn register_with<F>(&mut self, class_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn AmfClass> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Box::new(factory));
        self
    }

    /// Whether `class_name` is registered.
    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl ClassRegistry for TypeRegistry {
    fn new_instance(&self, class_name: &str) -> Option<Box<dyn AmfClass>> {
        self.factories.get(class_name).map(|factory| factory())
    }
}

pub(crate) trait ExternalSource {
    fn read_bytes(&mut self, len: usize) -> Result<Bytes>;
    fn read_value(&mut self) -> Result<AmfValue>;
}

/// Reader handed to [`AmfClass::read_external`].
///
/// Multi-byte numbers are big-endian. Values read with
/// [`read_object`](DataInput::read_object) share the reference tables of the
/// surrounding payload.
pub struct DataInput<'a> {
    source: &'a mut dyn ExternalSource,
}

impl<'a> DataInput<'a> {
    pub(crate) fn new(source: &'a mut dyn ExternalSource) -> Self {
        Self { source }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.source.read_bytes(N)?;
        let mut out = [0; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Reads a byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.source.read_bytes(1)?.take_u8()?)
    }

    /// Reads a boolean byte.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an `i16`.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_array().map(i16::from_be_bytes)
    }

    /// Reads a `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Reads an `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array().map(i32::from_be_bytes)
    }

    /// Reads a `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Reads an `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_array().map(f32::from_be_bytes)
    }

    /// Reads an `f64`.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.read_array().map(f64::from_be_bytes)
    }

    /// Reads a string with a `u16` length prefix.
    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u16()?;
        self.read_utf_bytes(len.into())
    }

    /// Reads `len` bytes of UTF-8.
    pub fn read_utf_bytes(&mut self, len: usize) -> Result<String> {
        let bytes = self.source.read_bytes(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.source.read_bytes(len)
    }

    /// Reads a complete AMF value.
    pub fn read_object(&mut self) -> Result<AmfValue> {
        self.source.read_value()
    }
}

pub(crate) trait ExternalSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    fn write_value(&mut self, value: &AmfValue) -> Result<()>;
}

/// Writer handed to [`AmfClass::write_external`].
pub struct DataOutput<'a> {
    sink: &'a mut dyn ExternalSink,
}

impl<'a> DataOutput<'a> {
    pub(crate) fn new(sink: &'a mut dyn ExternalSink) -> Self {
        Self { sink }
    }

    /// Writes a byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.sink.write_bytes(&[value])
    }

    /// Writes a boolean byte.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Writes an `i16`.
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    /// Writes a `u16`.
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    /// Writes an `i32`.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    /// Writes a `u32`.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    /// Writes an `f32`.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    /// Writes an `f64`.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    /// Writes a string with a `u16` length prefix.
    pub fn write_utf(&mut self, value: &str) -> Result<()> {
        self.write_u16(u16::try_from(value.len())?)?;
        self.write_utf_bytes(value)
    }

    /// Writes UTF-8 without a length prefix.
    pub fn write_utf_bytes(&mut self, value: &str) -> Result<()> {
        self.sink.write_bytes(value.as_bytes())
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_bytes(bytes)
    }

    /// Writes a complete AMF value.
    pub fn write_object(&mut self, value: &AmfValue) -> Result<()> {
        self.sink.write_value(value)
    }
}
