//! AMF3 variable length integers.
//!
//! Every U29 occupies one to four bytes. The first three bytes carry seven
//! bits each and use the high bit as a continuation flag, the fourth byte
//! carries a full eight bits. Lengths, counts and reference headers use the
//! unsigned view, the integer value kind uses the signed view.

use std::io;

use byteorder::WriteBytesExt;
use bytes::Buf;
use scuffle_bytes_util::BufExt;

use crate::error::{AmfError, Result};

/// Largest value of the unsigned view.
pub const U29_MAX: u32 = 0x1fff_ffff;
/// Smallest value of the signed view.
pub const I29_MIN: i32 = -0x1000_0000;
/// Largest value of the signed view.
pub const I29_MAX: i32 = 0x0fff_ffff;

/// Reads an unsigned U29.
pub fn read_u29<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value = 0u32;

    for _ in 0..3 {
        let byte = buf.take_u8()?;
        value = (value << 7) | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    let byte = buf.take_u8()?;
    Ok((value << 8) | u32::from(byte))
}

/// Reads a signed U29, sign extending bit 28.
pub fn read_i29<B: Buf>(buf: &mut B) -> Result<i32> {
    let value = read_u29(buf)?;
    Ok(((value << 3) as i32) >> 3)
}

/// Writes an unsigned U29 using as few bytes as possible.
pub fn write_u29<W: io::Write>(writer: &mut W, value: u32) -> Result<()> {
    match value {
        0..=0x7f => writer.write_u8(value as u8)?,
        0x80..=0x3fff => {
            writer.write_u8((value >> 7) as u8 | 0x80)?;
            writer.write_u8((value & 0x7f) as u8)?;
        }
        0x4000..=0x1f_ffff => {
            writer.write_u8((value >> 14) as u8 | 0x80)?;
            writer.write_u8(((value >> 7) & 0x7f) as u8 | 0x80)?;
            writer.write_u8((value & 0x7f) as u8)?;
        }
        0x20_0000..=U29_MAX => {
            writer.write_u8((value >> 22) as u8 | 0x80)?;
            writer.write_u8(((value >> 15) & 0x7f) as u8 | 0x80)?;
            writer.write_u8(((value >> 8) & 0x7f) as u8 | 0x80)?;
            writer.write_u8((value & 0xff) as u8)?;
        }
        _ => return Err(AmfError::U29OutOfRange(value.into())),
    }

    Ok(())
}

/// Writes a signed U29.
pub fn write_i29<W: io::Write>(writer: &mut W, value: i32) -> Result<()> {
    if !(I29_MIN..=I29_MAX).contains(&value) {
        return Err(AmfError::U29OutOfRange(value.into()));
    }

    write_u29(writer, value as u32 & U29_MAX)
}

/// Encodes an unsigned U29 into a fresh buffer.
pub fn encode_u29(value: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4);
    write_u29(&mut out, value)?;
    Ok(out)
}

/// Decodes an unsigned U29 from the start of `bytes`.
pub fn decode_u29(mut bytes: &[u8]) -> Result<u32> {
    read_u29(&mut bytes)
}

/// A U29 header that either points into a reference table or announces an
/// inline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefOrValue {
    /// Index into the table.
    Reference(usize),
    /// Inline value, usually a length or a count.
    Inline(u32),
}

impl RefOrValue {
    /// Reads the header, splitting off the low bit.
    pub fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        let value = read_u29(buf)?;
        if value & 1 == 0 {
            Ok(Self::Reference((value >> 1) as usize))
        } else {
            Ok(Self::Inline(value >> 1))
        }
    }

    /// Writes the header.
    pub fn write<W: io::Write>(self, writer: &mut W) -> Result<()> {
        match self {
            Self::Reference(index) => {
                let index = u32::try_from(index)?;
                if index > U29_MAX >> 1 {
                    return Err(AmfError::U29OutOfRange(index.into()));
                }
                write_u29(writer, index << 1)
            }
            Self::Inline(value) => {
                if value > U29_MAX >> 1 {
                    return Err(AmfError::U29OutOfRange(value.into()));
                }
                write_u29(writer, (value << 1) | 1)
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn unsigned_boundaries() {
        let cases: [(u32, usize); 9] = [
            (0, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (2097151, 3),
            (2097152, 4),
            (268435455, 4),
            (268435456, 4),
        ];

        for (value, len) in cases {
            let bytes = encode_u29(value).unwrap();
            assert_eq!(bytes.len(), len, "length of {value}");
            assert_eq!(decode_u29(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn signed_values() {
        let mut out = Vec::new();
        write_i29(&mut out, -1).unwrap();
        assert_eq!(out, [0xff, 0xff, 0xff, 0xff]);
        assert_eq!(read_i29(&mut out.as_slice()).unwrap(), -1);

        for value in [0, 1, 127, 128, 16384, I29_MAX, I29_MIN, -128] {
            let mut out = Vec::new();
            write_i29(&mut out, value).unwrap();
            assert_eq!(read_i29(&mut out.as_slice()).unwrap(), value);
        }

        assert!(matches!(write_i29(&mut Vec::new(), I29_MAX + 1), Err(AmfError::U29OutOfRange(_))));
        assert!(matches!(write_i29(&mut Vec::new(), I29_MIN - 1), Err(AmfError::U29OutOfRange(_))));
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encode_u29(0x7f).unwrap(), [0x7f]);
        assert_eq!(encode_u29(0x80).unwrap(), [0x81, 0x00]);
        assert_eq!(encode_u29(0x3fff).unwrap(), [0xff, 0x7f]);
        assert_eq!(encode_u29(0x4000).unwrap(), [0x81, 0x80, 0x00]);
        assert_eq!(encode_u29(0x20_0000).unwrap(), [0x80, 0xc0, 0x80, 0x00]);
        assert_eq!(encode_u29(U29_MAX).unwrap(), [0xff, 0xff, 0xff, 0xff]);
        assert!(encode_u29(U29_MAX + 1).is_err());
    }

    #[test]
    fn truncated() {
        let err = decode_u29(&[0x81, 0x80]).unwrap_err();
        assert!(matches!(
            err,
            AmfError::TruncatedInput {
                requested: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn ref_or_value() {
        assert_eq!(RefOrValue::read(&mut &[0x09][..]).unwrap(), RefOrValue::Inline(4));
        assert_eq!(RefOrValue::read(&mut &[0x04][..]).unwrap(), RefOrValue::Reference(2));

        let mut out = Vec::new();
        RefOrValue::Inline(4).write(&mut out).unwrap();
        RefOrValue::Reference(2).write(&mut out).unwrap();
        assert_eq!(out, [0x09, 0x04]);
    }
}
