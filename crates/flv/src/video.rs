//! FLV video tag header bit fields.

use nutype_enum::nutype_enum;

nutype_enum! {
    /// FLV Frame Type
    ///
    /// This enum represents the different types of frames in a FLV file.
    ///
    /// Defined by:
    /// - Legacy FLV spec, Annex E.4.3.1
    pub enum VideoFrameType(u8) {
        /// A keyframe is a frame that is a complete representation of the video content.
        KeyFrame = 1,
        /// An interframe is a frame that is a partial representation of the video content.
        InterFrame = 2,
        /// A disposable interframe is a frame that is a partial representation of the video content, but is not required to be displayed. (h263 only)
        DisposableInterFrame = 3,
        /// A generated keyframe is a frame that is a complete representation of the video content, but is not a keyframe. (reserved for server use only)
        GeneratedKeyFrame = 4,
        /// A video info or command frame.
        Command = 5,
    }
}

nutype_enum! {
    /// FLV Video Codec ID
    ///
    /// Denotes the different types of video codecs.
    ///
    /// Defined by:
    /// - Legacy FLV spec, Annex E.4.3.1
    pub enum VideoCodecId(u8) {
        /// Sorenson H.263
        SorensonH263 = 2,
        /// Screen Video
        ScreenVideo = 3,
        /// On2 VP6
        On2VP6 = 4,
        /// On2 VP6 with alpha channel
        On2VP6WithAlphaChannel = 5,
        /// Screen Video Version 2
        ScreenVideoVersion2 = 6,
        /// AVC (H.264)
        Avc = 7,
    }
}

/// The first byte of a video tag body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTagHeader {
    /// The frame type of the video data. (4 bits)
    pub frame_type: VideoFrameType,
    /// The codec of the video data. (4 bits)
    pub codec_id: VideoCodecId,
}

impl VideoTagHeader {
    /// Split the header byte into its fields.
    pub fn parse(byte: u8) -> Self {
        Self {
            frame_type: VideoFrameType::from((byte & 0b1111_0000) >> 4),
            codec_id: VideoCodecId::from(byte & 0b0000_1111),
        }
    }

    /// Pack the fields back into a header byte.
    pub fn to_byte(self) -> u8 {
        (u8::from(self.frame_type) << 4) | (u8::from(self.codec_id) & 0b0000_1111)
    }

    /// Whether the tag starts a keyframe that playback can seek to.
    pub fn is_keyframe(self) -> bool {
        self.frame_type == VideoFrameType::KeyFrame
    }
}
