//! The writer's sidecar files.
//!
//! While a file is being written, tags go to `<path>.ser` and the running
//! statistics to `<path>.info`. Both are removed once the final file has been
//! assembled, so their presence means a recording was not finalized.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(path.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// Path of the tag data store for the file at `path`.
pub fn data_path(path: &Path) -> PathBuf {
    with_suffix(path, ".ser")
}

/// Path of the info record for the file at `path`.
pub fn info_path(path: &Path) -> PathBuf {
    with_suffix(path, ".info")
}

/// Statistics a writer keeps about the stream it is writing.
///
/// Stored as eight big-endian 32 bit integers in the order of the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize))]
pub struct WriterInfo {
    /// Sound format of the first audio tag, `-1` if there is none.
    pub audio_codec_id: i32,
    /// Codec id of the first video tag, `-1` if there is none.
    pub video_codec_id: i32,
    /// Largest timestamp written, in milliseconds.
    pub duration: u32,
    /// Sum of all audio body sizes.
    pub audio_data_size: u32,
    /// Sample rate in Hz.
    pub sound_rate: u32,
    /// Bits per sample.
    pub sound_size: u32,
    /// Whether the audio is stereo.
    pub stereo: bool,
    /// Sum of all video body sizes.
    pub video_data_size: u32,
}

impl Default for WriterInfo {
    fn default() -> Self {
        Self {
            audio_codec_id: -1,
            video_codec_id: -1,
            duration: 0,
            audio_data_size: 0,
            sound_rate: 0,
            sound_size: 0,
            stereo: false,
            video_data_size: 0,
        }
    }
}

impl WriterInfo {
    /// Size of the encoded record.
    pub const SIZE: usize = 32;

    /// Demux a record.
    pub fn demux<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            audio_codec_id: reader.read_i32::<BigEndian>()?,
            video_codec_id: reader.read_i32::<BigEndian>()?,
            duration: reader.read_u32::<BigEndian>()?,
            audio_data_size: reader.read_u32::<BigEndian>()?,
            sound_rate: reader.read_u32::<BigEndian>()?,
            sound_size: reader.read_u32::<BigEndian>()?,
            stereo: reader.read_u32::<BigEndian>()? != 0,
            video_data_size: reader.read_u32::<BigEndian>()?,
        })
    }

    /// Mux the record.
    pub fn mux<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(self.audio_codec_id)?;
        writer.write_i32::<BigEndian>(self.video_codec_id)?;
        writer.write_u32::<BigEndian>(self.duration)?;
        writer.write_u32::<BigEndian>(self.audio_data_size)?;
        writer.write_u32::<BigEndian>(self.sound_rate)?;
        writer.write_u32::<BigEndian>(self.sound_size)?;
        writer.write_u32::<BigEndian>(u32::from(self.stereo))?;
        writer.write_u32::<BigEndian>(self.video_data_size)?;
        Ok(())
    }

    /// Read the record at `path`.
    ///
    /// Returns `None` when the file does not exist or is too short.
    pub fn load(path: &Path) -> Option<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read writer info");
                return None;
            }
        };

        match Self::demux(&mut io::Cursor::new(data)) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "truncated writer info");
                None
            }
        }
    }

    /// Replace the record at `path`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.mux(&mut buf)?;
        std::fs::write(path, buf)
    }

    /// Fill every statistic that is unset in `self` from `other`.
    pub fn fill_from(&mut self, other: &WriterInfo) {
        if self.audio_codec_id == -1 && other.audio_codec_id != -1 {
            self.audio_codec_id = other.audio_codec_id;
        }
        if self.video_codec_id == -1 && other.video_codec_id != -1 {
            self.video_codec_id = other.video_codec_id;
        }

        for (own, theirs) in [
            (&mut self.duration, other.duration),
            (&mut self.audio_data_size, other.audio_data_size),
            (&mut self.sound_rate, other.sound_rate),
            (&mut self.sound_size, other.sound_size),
            (&mut self.video_data_size, other.video_data_size),
        ] {
            if *own == 0 {
                *own = theirs;
            }
        }

        self.stereo |= other.stereo;
    }
}
