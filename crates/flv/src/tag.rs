//! FLV tags.

use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use nutype_enum::nutype_enum;
use scuffle_bytes_util::BytesCursorExt;

use crate::error::FlvError;

/// Size of the tag header that precedes every body.
pub const TAG_HEADER_SIZE: u32 = 11;

/// Largest body a tag can carry.
pub const MAX_BODY_SIZE: usize = 0x00ff_ffff;

nutype_enum! {
    /// FLV Tag Type
    ///
    /// This is the type of the tag.
    ///
    /// Defined by:
    /// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV File Format - FLV tags)
    /// - video_file_format_spec_v10_1.pdf (Annex E.4.1 - FLV Tag)
    ///
    /// The 3 types that are supported are:
    /// - Audio(8)
    /// - Video(9)
    /// - ScriptData(18)
    pub enum FlvTagType(u8) {
        /// [`crate::audio::AudioTagHeader`]
        Audio = 8,
        /// [`crate::video::VideoTagHeader`]
        Video = 9,
        /// [`crate::script::OnMetaData`] or [`crate::script::MetaCue`]
        ScriptData = 18,
    }
}

impl FlvTagType {
    /// Whether this is one of the three known tag types.
    pub fn is_known(self) -> bool {
        matches!(self, Self::Audio | Self::Video | Self::ScriptData)
    }
}

/// Rejoins the timestamp field read as one big-endian u32.
///
/// On the wire the low 24 bits come first and the extension byte (bits 24..31)
/// last, so the raw value is `(base << 8) | extension`.
pub fn rejoin_timestamp(raw: u32) -> u32 {
    (raw >> 8) | ((raw & 0xff) << 24)
}

/// An FLV Tag
///
/// Tags have different types and thus different data structures. The body is
/// kept as raw bytes, [`crate::audio`], [`crate::video`] and
/// [`crate::script`] know how to look inside.
///
/// Defined by:
/// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV File Format - FLV tags)
/// - video_file_format_spec_v10_1.pdf (Annex E.4.1 - FLV Tag)
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    /// The type of the tag.
    pub tag_type: FlvTagType,
    /// A timestamp in milliseconds, including the extension byte.
    pub timestamp: u32,
    /// The tag body.
    pub body: Bytes,
    /// The previous-tag-size field that preceded this tag in the stream.
    pub previous_tag_size: u32,
}

impl FlvTag {
    /// Create a tag. The previous tag size is left at zero.
    pub fn new(tag_type: FlvTagType, timestamp: u32, body: impl Into<Bytes>) -> Self {
        Self {
            tag_type,
            timestamp,
            body: body.into(),
            previous_tag_size: 0,
        }
    }

    /// Size of the body in bytes.
    pub fn body_size(&self) -> u32 {
        self.body.len() as u32
    }

    /// Size of the tag including its header, which is also the value of the
    /// trailer written after it.
    pub fn tag_size(&self) -> u32 {
        TAG_HEADER_SIZE + self.body_size()
    }

    /// Demux a tag from the given reader.
    ///
    /// The reader must be positioned at the type byte, so after the previous
    /// tag size. The body is sliced out without copying.
    pub fn demux(reader: &mut io::Cursor<Bytes>) -> Result<Self, FlvError> {
        let tag_type = FlvTagType::from(reader.read_u8()? & 0x1f);
        let data_size = reader.read_u24::<BigEndian>()?;
        let timestamp = rejoin_timestamp(reader.read_u32::<BigEndian>()?);
        // stream id, always 0
        reader.read_u24::<BigEndian>()?;

        let body = reader.extract_bytes(data_size as usize)?;

        Ok(FlvTag {
            tag_type,
            timestamp,
            body,
            previous_tag_size: 0,
        })
    }

    /// Mux the tag followed by its trailer (`11 + body_size`).
    pub fn mux<W: io::Write>(&self, writer: &mut W) -> Result<(), FlvError> {
        if self.body.len() > MAX_BODY_SIZE {
            return Err(FlvError::BodyTooLarge(self.body.len()));
        }

        writer.write_u8(u8::from(self.tag_type))?;
        writer.write_u24::<BigEndian>(self.body_size())?;
        writer.write_u24::<BigEndian>(self.timestamp & 0x00ff_ffff)?;
        writer.write_u8((self.timestamp >> 24) as u8)?;
        writer.write_u24::<BigEndian>(0)?;
        writer.write_all(&self.body)?;
        writer.write_u32::<BigEndian>(self.tag_size())?;

        Ok(())
    }

    /// Total bytes [`FlvTag::mux`] writes.
    pub fn muxed_len(&self) -> u64 {
        self.tag_size() as u64 + 4
    }
}
