//! Rebuilding files from the sidecar files of an interrupted writer.

use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::FlvError;
use crate::info::{WriterInfo, info_path};
use crate::script::OnMetaData;
use crate::tag::{FlvTagType, rejoin_timestamp};
use crate::writer::{FlvWriter, WriterConfig};

/// Audio codec assumed when no info record survived (Speex).
pub const DEFAULT_AUDIO_CODEC: i32 = 11;

/// Video codec assumed when no info record survived (AVC).
pub const DEFAULT_VIDEO_CODEC: i32 = 7;

const DEFAULT_SOUND_RATE: u32 = 16000;
const DEFAULT_SOUND_SIZE: u32 = 16;

/// What [`repair`] did.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize))]
pub struct RepairReport {
    /// The rebuilt file.
    pub flv_path: PathBuf,
    /// Bytes of tag data moved into it.
    pub bytes: u64,
    /// The metadata written into it.
    pub metadata: Option<OnMetaData>,
    /// Whether the statistics had to be reconstructed because there was no
    /// info record.
    pub used_defaults: bool,
}

/// Rebuild the file that `ser_path` (`<file>.ser`) belongs to.
///
/// Without an info record the codecs are taken from `audio_codec` and
/// `video_codec`, and the duration and data sizes from a scan of the data
/// store.
pub fn repair(ser_path: impl AsRef<Path>, audio_codec: i32, video_codec: i32) -> Result<RepairReport, FlvError> {
    let ser_path = ser_path.as_ref();

    if ser_path.extension().is_none_or(|ext| ext != "ser") {
        return Err(FlvError::InvalidPath(ser_path.to_path_buf()));
    }
    if !ser_path.exists() {
        return Err(FlvError::MissingDataFile(ser_path.to_path_buf()));
    }

    let flv_path = ser_path.with_extension("");
    let info_path = info_path(&flv_path);

    let used_defaults = WriterInfo::load(&info_path).is_none();
    if used_defaults {
        let scan = scan_data_store(ser_path)?;
        tracing::info!(
            path = %ser_path.display(),
            tags = scan.tags,
            duration = scan.duration,
            "no info record, using defaults"
        );

        WriterInfo {
            audio_codec_id: audio_codec,
            video_codec_id: video_codec,
            duration: scan.duration,
            audio_data_size: scan.audio_data_size,
            sound_rate: DEFAULT_SOUND_RATE,
            sound_size: DEFAULT_SOUND_SIZE,
            stereo: false,
            video_data_size: scan.video_data_size,
        }
        .save(&info_path)?;
    }

    let writer = FlvWriter::recover(flv_path.clone(), WriterConfig::default());
    let bytes = writer.finalize()?;

    Ok(RepairReport {
        flv_path,
        bytes,
        metadata: writer.written_metadata(),
        used_defaults,
    })
}

#[derive(Debug, Default, PartialEq)]
struct DataStoreScan {
    tags: usize,
    duration: u32,
    audio_data_size: u32,
    video_data_size: u32,
}

/// Walks the tags of a data store. Each tag is followed by its trailer and
/// there is no leading previous-tag-size.
fn scan_data_store(path: &Path) -> Result<DataStoreScan, FlvError> {
    let mut file = BufReader::new(File::open(path)?);
    let len = file.get_ref().metadata()?.len();
    let mut scan = DataStoreScan::default();
    let mut position = 0;

    while position + 15 <= len {
        let read = (|| -> io::Result<(FlvTagType, u32, u32)> {
            let tag_type = FlvTagType::from(file.read_u8()? & 0x1f);
            let body_size = file.read_u24::<BigEndian>()?;
            let timestamp = rejoin_timestamp(file.read_u32::<BigEndian>()?);
            Ok((tag_type, body_size, timestamp))
        })();

        let (tag_type, body_size, timestamp) = match read {
            Ok(header) => header,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };

        let next = position + 15 + u64::from(body_size);
        if next > len {
            tracing::debug!(position, body_size, "data store ends inside a tag");
            break;
        }

        match tag_type {
            FlvTagType::Audio => scan.audio_data_size = scan.audio_data_size.saturating_add(body_size),
            FlvTagType::Video => scan.video_data_size = scan.video_data_size.saturating_add(body_size),
            _ => {}
        }

        scan.tags += 1;
        scan.duration = scan.duration.max(timestamp);
        position = next;
        file.seek(SeekFrom::Start(position))?;
    }

    Ok(scan)
}
