//! FLV file header.

use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use crate::error::FlvError;

const SIGNATURE: u32 = u32::from_be_bytes([0, b'F', b'L', b'V']);

/// Size of the header without extra data.
pub const HEADER_SIZE: u32 = 9;

/// The FLV header
/// Whenever a FLV file is read these are the first 9 bytes of the file.
///
/// Defined by:
/// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV Header - Page 8)
/// - video_file_format_spec_v10_1.pdf (Annex E.2 - The FLV Header)
#[derive(Debug, Clone, PartialEq)]
pub struct FlvHeader {
    /// The version of the FLV file.
    pub version: u8,
    /// Whether the FLV file contains audio tags.
    pub is_audio_present: bool,
    /// Whether the FLV file contains video tags.
    pub is_video_present: bool,
    /// The extra data in the FLV header.
    ///
    /// Since the header provides a data offset, this is the remaining bytes after the DataOffset field
    /// to the end of the header.
    pub extra: Bytes,
}

impl FlvHeader {
    /// A version 1 header with the given presence flags.
    pub fn new(is_audio_present: bool, is_video_present: bool) -> Self {
        Self {
            version: 1,
            is_audio_present,
            is_video_present,
            extra: Bytes::new(),
        }
    }

    /// Offset of the first tag's previous-tag-size field.
    pub fn data_offset(&self) -> u32 {
        HEADER_SIZE + self.extra.len() as u32
    }

    /// Demux the FLV header from the given reader.
    /// The reader will be returned in the position of the start of the data
    /// offset.
    pub fn demux<R: io::Read>(reader: &mut R) -> Result<Self, FlvError> {
        Self::demux_inner(reader, true)
    }

    /// Like [`FlvHeader::demux`], but a bad signature is only logged.
    pub(crate) fn demux_lenient<R: io::Read>(reader: &mut R) -> Result<Self, FlvError> {
        Self::demux_inner(reader, false)
    }

    fn demux_inner<R: io::Read>(reader: &mut R, strict: bool) -> Result<Self, FlvError> {
        let signature = reader.read_u24::<BigEndian>()?;

        // 0 byte at the beginning because we are only reading 3 bytes not 4.
        if signature != SIGNATURE {
            if strict {
                return Err(FlvError::InvalidSignature(signature));
            }

            tracing::warn!(signature, "invalid flv signature");
        }

        let version = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let is_audio_present = (flags & 0b00000100) != 0;
        let is_video_present = (flags & 0b00000001) != 0;

        let data_offset = reader.read_u32::<BigEndian>()?;
        let remaining = data_offset
            .checked_sub(HEADER_SIZE)
            .ok_or(FlvError::InvalidDataOffset(data_offset))?;

        // bounded by what the input holds, not by the claimed offset
        let mut extra = Vec::new();
        reader.take(u64::from(remaining)).read_to_end(&mut extra)?;
        if extra.len() != remaining as usize {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok(FlvHeader {
            version,
            is_audio_present,
            is_video_present,
            extra: Bytes::from(extra),
        })
    }

    /// Mux the header followed by the first previous-tag-size field (always 0).
    pub fn mux<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u24::<BigEndian>(SIGNATURE)?;
        writer.write_u8(self.version)?;

        let mut flags = 0;
        if self.is_audio_present {
            flags |= 0b00000100;
        }
        if self.is_video_present {
            flags |= 0b00000001;
        }
        writer.write_u8(flags)?;

        writer.write_u32::<BigEndian>(self.data_offset())?;
        writer.write_all(&self.extra)?;
        writer.write_u32::<BigEndian>(0)?;

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn mux_layout() {
        let mut buf = Vec::new();
        FlvHeader::new(true, true).mux(&mut buf).unwrap();

        assert_eq!(buf, [b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9, 0, 0, 0, 0]);

        let mut buf = Vec::new();
        FlvHeader::new(true, false).mux(&mut buf).unwrap();
        assert_eq!(buf[4], 0x04);
    }

    #[test]
    fn demux_with_extra() {
        let data = [b'F', b'L', b'V', 1, 0x01, 0, 0, 0, 11, 0xaa, 0xbb, 0, 0, 0, 0];
        let mut reader = io::Cursor::new(&data[..]);

        let header = FlvHeader::demux(&mut reader).unwrap();
        assert_eq!(header.version, 1);
        assert!(!header.is_audio_present);
        assert!(header.is_video_present);
        assert_eq!(header.extra, Bytes::from_static(&[0xaa, 0xbb]));
        assert_eq!(header.data_offset(), 11);
        assert_eq!(reader.position(), 11);
    }

    #[test]
    fn bad_signature() {
        let data = [b'F', b'L', b'X', 1, 0x05, 0, 0, 0, 9];

        let err = FlvHeader::demux(&mut io::Cursor::new(&data[..])).unwrap_err();
        assert!(matches!(err, FlvError::InvalidSignature(0x464c58)));

        let header = FlvHeader::demux_lenient(&mut io::Cursor::new(&data[..])).unwrap();
        assert!(header.is_audio_present);
    }

    #[test]
    fn bad_data_offset() {
        let data = [b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 4];

        let err = FlvHeader::demux(&mut io::Cursor::new(&data[..])).unwrap_err();
        assert!(matches!(err, FlvError::InvalidDataOffset(4)));
    }

    #[test]
    fn data_offset_past_input() {
        let data = [b'F', b'L', b'V', 1, 0x05, 0xff, 0xff, 0xff, 0xff, 0xaa];

        let err = FlvHeader::demux(&mut io::Cursor::new(&data[..])).unwrap_err();
        assert!(matches!(err, FlvError::Io(ref err) if err.kind() == io::ErrorKind::UnexpectedEof));
    }
}
