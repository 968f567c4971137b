//! Cheap duration probing without a full scan.

use std::fs::File;
use std::io::{self, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;

use crate::error::FlvError;
use crate::header::HEADER_SIZE;
use crate::script::OnMetaData;
use crate::tag::{FlvTagType, TAG_HEADER_SIZE, rejoin_timestamp};

/// Offset of the first tag in a file without extra header data.
pub(crate) const FIRST_TAG_OFFSET: u64 = HEADER_SIZE as u64 + 4;

/// Duration of the file at `path`, in milliseconds.
///
/// See [`probe_duration`].
pub fn get_duration(path: impl AsRef<Path>) -> Result<u32, FlvError> {
    let mut file = File::open(path.as_ref())?;
    let duration = probe_duration(&mut file)?;
    tracing::debug!(path = %path.as_ref().display(), duration, "probed duration");
    Ok(duration)
}

/// Duration of an FLV stream, in milliseconds.
///
/// The timestamp of the last tag is used when the trailing previous-tag-size
/// is plausible. Otherwise the `duration` property of the metadata tag at the
/// start of the file is used. Returns `0` when neither is available.
pub fn probe_duration<R: io::Read + io::Seek>(reader: &mut R) -> Result<u32, FlvError> {
    let len = reader.seek(SeekFrom::End(0))?;

    if len > FIRST_TAG_OFFSET {
        reader.seek(SeekFrom::Start(len - 4))?;
        let last_tag_size = u64::from(reader.read_u32::<BigEndian>()?);

        if last_tag_size > 0 && last_tag_size + 4 + FIRST_TAG_OFFSET <= len {
            // the timestamp sits 4 bytes into the last tag
            reader.seek(SeekFrom::Start(len - last_tag_size))?;
            return Ok(rejoin_timestamp(reader.read_u32::<BigEndian>()?));
        }

        tracing::debug!(last_tag_size, len, "implausible last tag size, reading metadata");
    }

    Ok(metadata_duration(reader, len)?.unwrap_or(0))
}

fn metadata_duration<R: io::Read + io::Seek>(reader: &mut R, len: u64) -> Result<Option<u32>, FlvError> {
    if len < FIRST_TAG_OFFSET + u64::from(TAG_HEADER_SIZE) {
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(FIRST_TAG_OFFSET))?;
    if FlvTagType::from(reader.read_u8()? & 0x1f) != FlvTagType::ScriptData {
        return Ok(None);
    }

    let body_size = u64::from(reader.read_u24::<BigEndian>()?);
    // timestamp and stream id
    reader.seek(SeekFrom::Current(7))?;

    let available = len - FIRST_TAG_OFFSET - u64::from(TAG_HEADER_SIZE);
    let mut body = vec![0; body_size.min(available) as usize];
    reader.read_exact(&mut body)?;

    let meta = match OnMetaData::from_body(&Bytes::from(body)) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::debug!(error = %err, "first script tag is not usable metadata");
            return Ok(None);
        }
    };

    // a string duration ends up in `other`
    let seconds = meta.duration.or_else(|| {
        meta.get("duration")
            .and_then(|value| value.as_str())
            .and_then(|value| value.trim().parse::<f64>().ok())
    });

    Ok(seconds.filter(|s| s.is_finite() && *s >= 0.0).map(|s| (s * 1000.0).round() as u32))
}
