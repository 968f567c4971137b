use bytes::{Buf, Bytes};

/// Returned when a [`Buf`] does not hold as many bytes as a read requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not enough data: requested {requested} bytes but only {available} are available")]
pub struct NotEnoughData {
    /// The number of bytes the read needed.
    pub requested: usize,
    /// The number of bytes that were left in the buffer.
    pub available: usize,
}

/// Bounds-checked big-endian reads for any [`Buf`].
///
/// The plain `get_*` methods on [`Buf`] panic when the buffer runs dry, which is
/// not acceptable when parsing untrusted input. Every method here checks the
/// remaining length first and leaves the buffer untouched on failure.
pub trait BufExt: Buf {
    /// Fails unless at least `len` bytes remain.
    fn ensure(&self, len: usize) -> Result<(), NotEnoughData> {
        let available = self.remaining();
        if available < len {
            Err(NotEnoughData {
                requested: len,
                available,
            })
        } else {
            Ok(())
        }
    }

    /// Reads a single byte.
    fn take_u8(&mut self) -> Result<u8, NotEnoughData> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    /// Reads a big-endian `u16`.
    fn take_u16(&mut self) -> Result<u16, NotEnoughData> {
        self.ensure(2)?;
        Ok(self.get_u16())
    }

    /// Reads a big-endian `i16`.
    fn take_i16(&mut self) -> Result<i16, NotEnoughData> {
        self.ensure(2)?;
        Ok(self.get_i16())
    }

    /// Reads a big-endian 24 bit unsigned integer.
    fn take_u24(&mut self) -> Result<u32, NotEnoughData> {
        self.ensure(3)?;
        Ok(self.get_uint(3) as u32)
    }

    /// Reads a big-endian `u32`.
    fn take_u32(&mut self) -> Result<u32, NotEnoughData> {
        self.ensure(4)?;
        Ok(self.get_u32())
    }

    /// Reads a big-endian `i32`.
    fn take_i32(&mut self) -> Result<i32, NotEnoughData> {
        self.ensure(4)?;
        Ok(self.get_i32())
    }

    /// Reads a big-endian `f32`.
    fn take_f32(&mut self) -> Result<f32, NotEnoughData> {
        self.ensure(4)?;
        Ok(self.get_f32())
    }

    /// Reads a big-endian `f64`.
    fn take_f64(&mut self) -> Result<f64, NotEnoughData> {
        self.ensure(8)?;
        Ok(self.get_f64())
    }

    /// Splits off the next `len` bytes.
    fn take_bytes(&mut self, len: usize) -> Result<Bytes, NotEnoughData> {
        self.ensure(len)?;
        Ok(self.copy_to_bytes(len))
    }
}

impl<B: Buf + ?Sized> BufExt for B {}
