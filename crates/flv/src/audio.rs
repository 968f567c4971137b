//! FLV audio tag header bit fields.

use nutype_enum::nutype_enum;

nutype_enum! {
    /// FLV Sound Format
    ///
    /// Denotes the type of the underlying data packet
    ///
    /// Defined by:
    /// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV File Format - Audio tags)
    /// - video_file_format_spec_v10_1.pdf (Annex E.4.2.1 - AUDIODATA)
    pub enum SoundFormat(u8) {
        /// Linear PCM, platform endian
        LinearPcmPlatformEndian = 0,
        /// ADPCM
        Adpcm = 1,
        /// MP3
        Mp3 = 2,
        /// Linear PCM, little endian
        LinearPcmLittleEndian = 3,
        /// Nellymoser 16Khz Mono
        Nellymoser16KhzMono = 4,
        /// Nellymoser 8Khz Mono
        Nellymoser8KhzMono = 5,
        /// Nellymoser
        Nellymoser = 6,
        /// G.711 A-Law logarithmic PCM
        G711ALaw = 7,
        /// G.711 Mu-Law logarithmic PCM
        G711MuLaw = 8,
        /// AAC
        Aac = 10,
        /// Speex
        Speex = 11,
        /// Mp3 8Khz
        Mp38Khz = 14,
        /// Device specific sound
        DeviceSpecificSound = 15,
    }
}

nutype_enum! {
    /// FLV Sound Rate
    ///
    /// Denotes the sampling rate of the audio data.
    ///
    /// Defined by:
    /// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV File Format - Audio tags)
    /// - video_file_format_spec_v10_1.pdf (Annex E.4.2.1 - AUDIODATA)
    pub enum SoundRate(u8) {
        /// 5.5 KHz
        Hz5500 = 0,
        /// 11 KHz
        Hz11000 = 1,
        /// 22 KHz
        Hz22000 = 2,
        /// 44 KHz
        Hz44000 = 3,
    }
}

impl SoundRate {
    /// The rate in Hz as written to `audiosamplerate`.
    pub fn hz(self) -> u32 {
        match self {
            Self::Hz5500 => 5500,
            Self::Hz11000 => 11000,
            Self::Hz22000 => 22000,
            _ => 44100,
        }
    }
}

nutype_enum! {
    /// FLV Sound Size
    ///
    /// Denotes the size of each sample in the audio data.
    ///
    /// Defined by:
    /// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV File Format - Audio tags)
    /// - video_file_format_spec_v10_1.pdf (Annex E.4.2.1 - AUDIODATA)
    pub enum SoundSize(u8) {
        /// 8 bit
        Bit8 = 0,
        /// 16 bit
        Bit16 = 1,
    }
}

impl SoundSize {
    /// Bits per sample.
    pub fn bits(self) -> u32 {
        if self == Self::Bit8 { 8 } else { 16 }
    }
}

nutype_enum! {
    /// FLV Sound Type
    ///
    /// Denotes the number of channels in the audio data.
    ///
    /// Defined by:
    /// - video_file_format_spec_v10.pdf (Chapter 1 - The FLV File Format - Audio tags)
    /// - video_file_format_spec_v10_1.pdf (Annex E.4.2.1 - AUDIODATA)
    pub enum SoundType(u8) {
        /// Mono
        Mono = 0,
        /// Stereo
        Stereo = 1,
    }
}

/// The first byte of an audio tag body.
///
/// Defined by video_file_format_spec_v10_1.pdf (Annex E.4.2.1 - AUDIODATA).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTagHeader {
    /// The sound format of the audio data. (4 bits)
    pub sound_format: SoundFormat,
    /// The sound rate of the audio data. (2 bits)
    pub sound_rate: SoundRate,
    /// The sound size of the audio data. (1 bit)
    pub sound_size: SoundSize,
    /// The sound type of the audio data. (1 bit)
    pub sound_type: SoundType,
}

impl AudioTagHeader {
    /// Split the header byte into its fields.
    #[allow(clippy::unusual_byte_groupings)]
    pub fn parse(byte: u8) -> Self {
        Self {
            sound_format: SoundFormat::from(byte >> 4), // 0b1111_00_0_0
            sound_rate: SoundRate::from((byte & 0b0000_11_0_0) >> 2),
            sound_size: SoundSize::from((byte & 0b0000_00_1_0) >> 1),
            sound_type: SoundType::from(byte & 0b0000_00_0_1),
        }
    }

    /// Pack the fields back into a header byte.
    pub fn to_byte(self) -> u8 {
        (u8::from(self.sound_format) << 4)
            | ((u8::from(self.sound_rate) & 0b11) << 2)
            | ((u8::from(self.sound_size) & 0b1) << 1)
            | (u8::from(self.sound_type) & 0b1)
    }

    /// Sample rate, size and channel layout as they are reported in metadata.
    ///
    /// AAC and Speex carry their real parameters in the bitstream, so fixed
    /// values are used for them.
    pub fn stream_parameters(self) -> (u32, u32, bool) {
        match self.sound_format {
            SoundFormat::Aac => (44100, 16, true),
            SoundFormat::Speex => (16000, 16, false),
            _ => (self.sound_rate.hz(), self.sound_size.bits(), self.sound_type == SoundType::Stereo),
        }
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn parse_and_pack() {
        let header = AudioTagHeader::parse(0xaf);
        assert_eq!(header.sound_format, SoundFormat::Aac);
        assert_eq!(header.sound_rate, SoundRate::Hz44000);
        assert_eq!(header.sound_size, SoundSize::Bit16);
        assert_eq!(header.sound_type, SoundType::Stereo);
        assert_eq!(header.to_byte(), 0xaf);

        let header = AudioTagHeader::parse(0x22);
        assert_eq!(header.sound_format, SoundFormat::Mp3);
        assert_eq!(header.sound_rate, SoundRate::Hz5500);
        assert_eq!(header.sound_size, SoundSize::Bit16);
        assert_eq!(header.sound_type, SoundType::Mono);
    }

    #[test]
    fn stream_parameters() {
        assert_eq!(AudioTagHeader::parse(0xa0).stream_parameters(), (44100, 16, true));
        assert_eq!(AudioTagHeader::parse(0xb6).stream_parameters(), (16000, 16, false));
        assert_eq!(AudioTagHeader::parse(0x29).stream_parameters(), (22000, 8, true));
    }
}
