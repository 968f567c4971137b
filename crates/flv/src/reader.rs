//! Tag stream reader.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;
use scuffle_amf::AmfMap;

use crate::audio::AudioTagHeader;
use crate::error::FlvError;
use crate::header::{FlvHeader, HEADER_SIZE};
use crate::keyframe::{KeyFrameMeta, KeyFrameMetaCache};
use crate::script::{ON_META_DATA, encode_script};
use crate::tag::{FlvTag, FlvTagType, TAG_HEADER_SIZE, rejoin_timestamp};
use crate::video::VideoTagHeader;

/// Options for [`FlvReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    buffer_size: usize,
    generate_metadata: bool,
    resync_limit: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            generate_metadata: false,
            resync_limit: 10,
        }
    }
}

impl ReaderConfig {
    /// Smallest accepted read buffer.
    pub const MIN_BUFFER_SIZE: usize = 1024;

    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the read buffer. Values below 1024 are raised to 1024.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(Self::MIN_BUFFER_SIZE);
        self
    }

    /// Emit a synthesized `onMetaData` tag before the first audio or video tag.
    pub fn generate_metadata(mut self, enabled: bool) -> Self {
        self.generate_metadata = enabled;
        self
    }

    /// How many extra bytes are read to find a valid tag type before giving up.
    pub fn resync_limit(mut self, limit: usize) -> Self {
        self.resync_limit = limit;
        self
    }
}

/// Lifecycle of a [`FlvReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Constructed, nothing read yet.
    Created,
    /// The source is too short to hold a header.
    HeaderPending,
    /// The header has been read and tags can be read.
    Streaming,
    /// [`FlvReader::close`] was called.
    Closed,
}

trait Source: io::Read + io::Seek + Send {}

impl<T: io::Read + io::Seek + Send> Source for T {}

/// A buffered source that knows its position.
struct Tracked {
    inner: BufReader<Box<dyn Source>>,
    position: u64,
}

impl Tracked {
    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        let delta = position as i64 - self.position as i64;
        self.inner.seek_relative(delta)?;
        self.position = position;
        Ok(())
    }
}

impl io::Read for Tracked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy)]
struct TagHeader {
    previous_tag_size: u32,
    tag_type: FlvTagType,
    body_size: u32,
    timestamp: u32,
}

struct ReaderInner {
    source: Option<Tracked>,
    state: ReaderState,
    total_bytes: u64,
    header: Option<FlvHeader>,
    config: ReaderConfig,
    path: Option<PathBuf>,
    keyframe_cache: Option<Arc<dyn KeyFrameMetaCache>>,
    keyframes: Option<Arc<KeyFrameMeta>>,
    metadata_sent: bool,
}

fn is_eof(err: &FlvError) -> bool {
    matches!(err, FlvError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
}

impl ReaderInner {
    fn source(&mut self) -> Result<&mut Tracked, FlvError> {
        self.source.as_mut().ok_or(FlvError::Closed)
    }

    fn position(&self) -> u64 {
        self.source.as_ref().map_or(0, |source| source.position)
    }

    fn remaining(&self) -> u64 {
        self.total_bytes.saturating_sub(self.position())
    }

    fn has_more_tags(&self) -> bool {
        self.source.is_some() && self.state != ReaderState::HeaderPending && self.remaining() > 4
    }

    fn seek_to(&mut self, position: u64) -> Result<(), FlvError> {
        let position = position.min(self.total_bytes);
        self.source()?.seek_to(position)?;
        Ok(())
    }

    fn decode_header(&mut self) -> Result<(), FlvError> {
        if self.total_bytes < HEADER_SIZE as u64 {
            self.state = ReaderState::HeaderPending;
            return Ok(());
        }

        self.seek_to(0)?;
        let header = FlvHeader::demux_lenient(self.source()?)?;
        tracing::debug!(
            version = header.version,
            audio = header.is_audio_present,
            video = header.is_video_present,
            "flv header"
        );

        self.header = Some(header);
        self.state = ReaderState::Streaming;
        Ok(())
    }

    fn data_offset(&self) -> u64 {
        self.header.as_ref().map_or(HEADER_SIZE, FlvHeader::data_offset) as u64
    }

    /// Reads the previous tag size and the tag header. Returns `None` when no
    /// valid tag type shows up within the resync limit.
    fn read_tag_header(&mut self) -> Result<Option<TagHeader>, FlvError> {
        let resync_limit = self.config.resync_limit;
        let source = self.source()?;

        let previous_tag_size = source.read_u32::<BigEndian>()?;
        let mut tag_type = FlvTagType::from(source.read_u8()? & 0x1f);

        if !tag_type.is_known() {
            tracing::debug!(tag_type = u8::from(tag_type), position = source.position, "invalid tag type, reading ahead");

            let mut extra = 0;
            while !tag_type.is_known() {
                if extra >= resync_limit {
                    tracing::warn!(position = source.position, "corrupt tag stream, no valid tag type found");
                    return Ok(None);
                }

                extra += 1;
                tag_type = FlvTagType::from(source.read_u8()? & 0x1f);
            }
        }

        let body_size = source.read_u24::<BigEndian>()?;
        let timestamp = rejoin_timestamp(source.read_u32::<BigEndian>()?);
        let stream_id = source.read_u24::<BigEndian>()?;

        tracing::trace!(
            tag_type = u8::from(tag_type),
            timestamp,
            stream_id,
            body_size,
            previous_tag_size,
            "tag header"
        );

        Ok(Some(TagHeader {
            previous_tag_size,
            tag_type,
            body_size,
            timestamp,
        }))
    }

    fn read_tag(&mut self) -> Result<Option<FlvTag>, FlvError> {
        match self.state {
            ReaderState::Closed => return Err(FlvError::Closed),
            ReaderState::Created | ReaderState::HeaderPending => {
                self.decode_header()?;
                if self.state != ReaderState::Streaming {
                    return Ok(None);
                }
            }
            ReaderState::Streaming => {}
        }

        if !self.has_more_tags() {
            return Ok(None);
        }

        let start = self.position();
        let header = match self.read_tag_header() {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(err) if is_eof(&err) => {
                tracing::debug!(position = start, "truncated tag header");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if self.config.generate_metadata && !self.metadata_sent && header.tag_type != FlvTagType::ScriptData {
            self.seek_to(start)?;
            let meta = self.analyze()?;
            self.metadata_sent = true;
            return Ok(Some(metadata_tag(&meta)?));
        }

        let available = self.remaining();
        let len = u64::from(header.body_size).min(available);
        if len < u64::from(header.body_size) {
            tracing::warn!(body_size = header.body_size, available, "tag body clipped to end of stream");
        }

        let mut body = vec![0; len as usize];
        self.source()?.read_exact(&mut body)?;

        Ok(Some(FlvTag {
            tag_type: header.tag_type,
            timestamp: header.timestamp,
            body: Bytes::from(body),
            previous_tag_size: header.previous_tag_size,
        }))
    }

    fn analyze(&mut self) -> Result<Arc<KeyFrameMeta>, FlvError> {
        if let Some(meta) = &self.keyframes {
            return Ok(meta.clone());
        }

        if self.source.is_none() {
            return Err(FlvError::Closed);
        }

        if let (Some(cache), Some(path)) = (&self.keyframe_cache, &self.path) {
            if let Some(meta) = cache.load(path) {
                tracing::debug!(path = %path.display(), "keyframes loaded from cache");
                self.keyframes = Some(meta.clone());
                return Ok(meta);
            }
        }

        let original = self.position();
        let result = self.scan_keyframes();
        self.seek_to(original)?;
        let meta = Arc::new(result?);

        if let (Some(cache), Some(path)) = (&self.keyframe_cache, &self.path) {
            cache.save(path, &meta);
        }

        self.keyframes = Some(meta.clone());
        Ok(meta)
    }

    fn scan_keyframes(&mut self) -> Result<KeyFrameMeta, FlvError> {
        let mut meta = KeyFrameMeta::default();
        let mut audio_positions = Vec::new();
        let mut audio_timestamps = Vec::new();
        let mut valid_tags = 0;

        self.seek_to(self.data_offset())?;

        while self.has_more_tags() {
            let position = self.position();
            let header = match self.read_tag_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(err) if is_eof(&err) => break,
                Err(err) => return Err(err),
            };

            valid_tags += 1;
            meta.duration = header.timestamp;

            let first_byte = if header.body_size > 0 && self.remaining() > 0 {
                Some(self.source()?.read_u8()?)
            } else {
                None
            };

            match header.tag_type {
                FlvTagType::Video => {
                    if meta.audio_only {
                        meta.audio_only = false;
                        audio_positions.clear();
                        audio_timestamps.clear();
                    }

                    if let Some(byte) = first_byte {
                        let video = VideoTagHeader::parse(byte);
                        if meta.video_codec_id == -1 {
                            meta.video_codec_id = i32::from(u8::from(video.codec_id));
                        }
                        if video.is_keyframe() {
                            meta.positions.push(position);
                            meta.timestamps.push(header.timestamp);
                        }
                    }
                }
                FlvTagType::Audio => {
                    if let Some(byte) = first_byte {
                        if meta.audio_codec_id == -1 {
                            meta.audio_codec_id = i32::from(u8::from(AudioTagHeader::parse(byte).sound_format));
                        }
                    }
                    if meta.audio_only {
                        audio_positions.push(position);
                        audio_timestamps.push(header.timestamp);
                    }
                }
                _ => {}
            }

            let next = position + u64::from(header.body_size) + u64::from(TAG_HEADER_SIZE) + 4;
            if next >= self.total_bytes {
                tracing::debug!(next, total = self.total_bytes, "next tag offset reaches the end of the stream");
                break;
            }

            self.seek_to(next)?;
        }

        if meta.audio_only {
            meta.positions = audio_positions;
            meta.timestamps = audio_timestamps;
        }

        tracing::debug!(valid_tags, keyframes = meta.positions.len(), "keyframe analysis done");
        Ok(meta)
    }
}

fn metadata_tag(meta: &KeyFrameMeta) -> Result<FlvTag, FlvError> {
    let mut map = AmfMap::new();
    map.insert("duration", f64::from(meta.duration) / 1000.0);
    if meta.video_codec_id != -1 {
        map.insert("videocodecid", f64::from(meta.video_codec_id));
    }
    if meta.audio_codec_id != -1 {
        map.insert("audiocodecid", f64::from(meta.audio_codec_id));
    }
    map.insert("canSeekToEnd", true);

    Ok(FlvTag::new(FlvTagType::ScriptData, 0, encode_script(ON_META_DATA, map)?))
}

/// Reads tags from a file or an in-memory buffer.
///
/// All position dependent operations go through one lock, so a reader can be
/// shared between threads.
pub struct FlvReader {
    inner: Mutex<ReaderInner>,
}

impl std::fmt::Debug for FlvReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FlvReader")
            .field("state", &inner.state)
            .field("path", &inner.path)
            .field("position", &inner.position())
            .field("total_bytes", &inner.total_bytes)
            .finish_non_exhaustive()
    }
}

impl FlvReader {
    fn new(source: Box<dyn Source>, total_bytes: u64, path: Option<PathBuf>, config: ReaderConfig) -> Result<Self, FlvError> {
        let mut inner = ReaderInner {
            source: Some(Tracked {
                inner: BufReader::with_capacity(config.buffer_size, source),
                position: 0,
            }),
            state: ReaderState::Created,
            total_bytes,
            header: None,
            config,
            path,
            keyframe_cache: None,
            keyframes: None,
            metadata_sent: false,
        };

        inner.decode_header()?;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Open a file.
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self, FlvError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();

        tracing::debug!(path = %path.display(), total_bytes, "opening flv");
        Self::new(Box::new(file), total_bytes, Some(path.to_path_buf()), config)
    }

    /// Read from a buffer that holds a whole file.
    pub fn from_bytes(data: Bytes, config: ReaderConfig) -> Result<Self, FlvError> {
        let total_bytes = data.len() as u64;
        Self::new(Box::new(io::Cursor::new(data)), total_bytes, None, config)
    }

    /// Consult and fill `cache` when analyzing keyframes.
    ///
    /// Only readers opened from a path use the cache.
    pub fn with_keyframe_cache(mut self, cache: Arc<dyn KeyFrameMetaCache>) -> Self {
        self.inner.get_mut().keyframe_cache = Some(cache);
        self
    }

    /// Read the next tag.
    ///
    /// Returns `None` at the end of the stream or when the stream is too
    /// damaged to continue.
    pub fn read_tag(&self) -> Result<Option<FlvTag>, FlvError> {
        self.inner.lock().read_tag()
    }

    /// Whether more than a trailing previous-tag-size field is left.
    pub fn has_more_tags(&self) -> bool {
        self.inner.lock().has_more_tags()
    }

    /// Build the keyframe index. The result is memoized for the lifetime of
    /// the reader and shared through the keyframe cache.
    pub fn analyze_keyframes(&self) -> Result<Arc<KeyFrameMeta>, FlvError> {
        self.inner.lock().analyze()
    }

    /// Whether the file has at least one video keyframe.
    pub fn has_video(&self) -> Result<bool, FlvError> {
        Ok(self.analyze_keyframes()?.has_video())
    }

    /// Codec id of the first video tag, `-1` if there is none.
    pub fn video_codec_id(&self) -> Result<i32, FlvError> {
        Ok(self.analyze_keyframes()?.video_codec_id)
    }

    /// Codec id of the first audio tag, `-1` if there is none.
    pub fn audio_codec_id(&self) -> Result<i32, FlvError> {
        Ok(self.analyze_keyframes()?.audio_codec_id)
    }

    /// Timestamp of the last tag, in milliseconds.
    pub fn duration(&self) -> Result<u32, FlvError> {
        Ok(self.analyze_keyframes()?.duration)
    }

    /// Move to the last seek point at or before `timestamp`.
    ///
    /// Returns the timestamp of the seek point, or `None` (without moving)
    /// when there is none.
    pub fn seek_to_keyframe(&self, timestamp: u32) -> Result<Option<u32>, FlvError> {
        let mut inner = self.inner.lock();
        let meta = inner.analyze()?;

        let Some((position, found)) = meta.seek_point(timestamp) else {
            return Ok(None);
        };

        inner.seek_to(position)?;
        Ok(Some(found))
    }

    /// Move to a byte offset. The offset should point at a previous-tag-size
    /// field.
    pub fn seek(&self, position: u64) -> Result<(), FlvError> {
        let mut inner = self.inner.lock();
        if inner.state == ReaderState::Closed {
            return Err(FlvError::Closed);
        }
        inner.seek_to(position)
    }

    /// Size of the source in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    /// Current byte offset.
    pub fn position(&self) -> u64 {
        self.inner.lock().position()
    }

    /// Bytes consumed so far, which is the current offset.
    pub fn bytes_read(&self) -> u64 {
        self.position()
    }

    /// The file header, once it has been read.
    pub fn header(&self) -> Option<FlvHeader> {
        self.inner.lock().header.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.inner.lock().state
    }

    /// Release the source. Later reads fail with [`FlvError::Closed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.source = None;
        inner.state = ReaderState::Closed;
        tracing::debug!(path = ?inner.path, "reader closed");
    }
}
