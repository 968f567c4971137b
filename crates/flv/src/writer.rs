//! Crash tolerant tag writer.
//!
//! Tags are first written to a data store next to the target file together
//! with an info record holding the running statistics. The final file is only
//! assembled when the writer is closed, so a recording that was cut off can
//! still be rebuilt from the sidecar files with [`crate::repair`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;

use crate::audio::{AudioTagHeader, SoundFormat};
use crate::duration::{FIRST_TAG_OFFSET, get_duration};
use crate::error::FlvError;
use crate::header::FlvHeader;
use crate::info::{WriterInfo, data_path, info_path};
use crate::script::{ON_CUE_POINT, ON_META_DATA, OnMetaData, script_name};
use crate::spawn::{Spawner, ThreadSpawner};
use crate::tag::{FlvTag, FlvTagType};
use crate::video::VideoTagHeader;

/// Options for [`FlvWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    close_timeout: Duration,
    finalizer_delay: Duration,
    server: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_millis(500),
            finalizer_delay: Duration::from_secs(2),
            server: concat!("scuffle-flv ", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl WriterConfig {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// How long [`FlvWriter::close`] waits for a write in progress.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// How long a deferred finalizer waits before it tries again.
    pub fn finalizer_delay(mut self, delay: Duration) -> Self {
        self.finalizer_delay = delay;
        self
    }

    /// Value of the `metadatacreator` metadata property.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }
}

/// Result of [`FlvWriter::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The final file was assembled.
    Finalized {
        /// Bytes moved into the final file.
        bytes: u64,
    },
    /// Finalization was handed to the [`Spawner`].
    Deferred,
}

struct WriterInner {
    path: PathBuf,
    append: bool,
    /// The data store, or the target itself for append sessions. `None` once
    /// finalization started.
    data: Option<File>,
    bytes_written: u64,
    /// Bytes already in the target when an append session started.
    initial_length: u64,
    time_offset: u32,
    stats: WriterInfo,
    last_tag_size: u32,
    started: Option<Instant>,
    buffered: Vec<(SystemTime, OnMetaData)>,
    metadata: Option<OnMetaData>,
    finalized: Option<u64>,
}

impl WriterInner {
    fn save_info(&self) {
        if let Err(err) = self.stats.save(&info_path(&self.path)) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write writer info");
        }
    }

    fn write_tag(&mut self, tag: &FlvTag) -> Result<(), FlvError> {
        if self.data.is_none() {
            return Err(FlvError::Closed);
        }

        if tag.tag_type == FlvTagType::ScriptData {
            let name = script_name(&tag.body)?;
            match name.as_str() {
                ON_CUE_POINT => {}
                ON_META_DATA => {
                    let meta = OnMetaData::from_body(&tag.body)?;
                    tracing::debug!(properties = meta.other.len(), "buffering metadata until finalize");
                    self.buffered.push((SystemTime::now(), meta));
                    return Ok(());
                }
                _ => {
                    tracing::debug!(name = %name, "dropping script tag");
                    return Ok(());
                }
            }
        }

        let timestamp = tag.timestamp.wrapping_add(self.time_offset);
        self.record_stats(tag);

        let tag = FlvTag {
            timestamp,
            ..tag.clone()
        };
        let mut buf = Vec::with_capacity(tag.muxed_len() as usize);
        tag.mux(&mut buf)?;

        let position = self.bytes_written;
        let Some(data) = self.data.as_mut() else {
            return Err(FlvError::Closed);
        };
        data.seek(SeekFrom::Start(position))?;
        data.write_all(&buf)?;

        self.bytes_written += buf.len() as u64;
        self.last_tag_size = tag.tag_size();
        self.stats.duration = self.stats.duration.max(timestamp);

        tracing::trace!(
            tag_type = u8::from(tag.tag_type),
            timestamp,
            size = tag.body_size(),
            bytes_written = self.bytes_written,
            "wrote tag"
        );

        Ok(())
    }

    fn record_stats(&mut self, tag: &FlvTag) {
        let Some(&first) = tag.body.first() else {
            return;
        };

        match tag.tag_type {
            FlvTagType::Audio => {
                self.stats.audio_data_size = self.stats.audio_data_size.saturating_add(tag.body_size());
                if self.stats.audio_codec_id == -1 {
                    let header = AudioTagHeader::parse(first);
                    let (rate, size, stereo) = header.stream_parameters();
                    self.stats.audio_codec_id = i32::from(u8::from(header.sound_format));
                    self.stats.sound_rate = rate;
                    self.stats.sound_size = size;
                    self.stats.stereo = stereo;
                }
            }
            FlvTagType::Video => {
                self.stats.video_data_size = self.stats.video_data_size.saturating_add(tag.body_size());
                if self.stats.video_codec_id == -1 {
                    self.stats.video_codec_id = i32::from(u8::from(VideoTagHeader::parse(first).codec_id));
                }
            }
            _ => {}
        }
    }

    fn build_metadata(&self, server: &str) -> OnMetaData {
        let seconds = f64::from(self.stats.duration) / 1000.0;
        let rate = |size: u32| (size > 0 && seconds > 0.0).then(|| 8.0 * f64::from(size) / 1024.0 / seconds);
        let creation_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_millis() as f64);

        let mut meta = OnMetaData {
            metadata_creator: Some(server.to_owned()),
            creation_date: Some(creation_date),
            duration: Some(seconds),
            can_seek_to_end: Some(true),
            ..Default::default()
        };

        if self.stats.video_codec_id != -1 {
            meta.video_codec_id = Some(self.stats.video_codec_id);
            meta.video_data_rate = rate(self.stats.video_data_size);
        }

        if self.stats.audio_codec_id != -1 {
            let (sample_rate, sample_size) = match SoundFormat::from(self.stats.audio_codec_id as u8) {
                SoundFormat::Aac => (44100, 16),
                SoundFormat::Speex => (16000, 16),
                _ => (self.stats.sound_rate, self.stats.sound_size),
            };

            meta.audio_codec_id = Some(self.stats.audio_codec_id);
            meta.audio_sample_rate = Some(f64::from(sample_rate));
            meta.audio_sample_size = Some(f64::from(sample_size));
            meta.stereo = Some(self.stats.stereo);
            meta.audio_data_rate = rate(self.stats.audio_data_size);
        }

        let mut buffered: Vec<_> = self.buffered.iter().collect();
        buffered.sort_by_key(|(arrived, _)| *arrived);
        for (_, other) in buffered {
            meta.fill_from(other);
        }

        meta
    }

    fn finalize(&mut self, config: &WriterConfig) -> Result<u64, FlvError> {
        if let Some(bytes) = self.finalized {
            return Ok(bytes);
        }

        if let Some(info) = WriterInfo::load(&info_path(&self.path)) {
            self.stats.fill_from(&info);
        }

        let metadata = self.build_metadata(&config.server);
        let body = metadata.to_body()?;
        let meta_tag = FlvTag::new(FlvTagType::ScriptData, 0, body);

        let bytes = if self.append {
            self.finalize_append(&meta_tag)?
        } else {
            self.finalize_fresh(&meta_tag)?
        };

        self.metadata = Some(metadata);

        if bytes == 0 {
            tracing::warn!(path = %self.path.display(), "finalize moved no data, keeping sidecar files");
            return Ok(0);
        }

        if !self.append {
            remove_if_exists(&data_path(&self.path))?;
        }
        remove_if_exists(&info_path(&self.path))?;

        self.finalized = Some(bytes);
        tracing::info!(path = %self.path.display(), bytes, duration = self.stats.duration, "flv finalized");
        Ok(bytes)
    }

    fn finalize_fresh(&mut self, meta_tag: &FlvTag) -> Result<u64, FlvError> {
        let data_path = data_path(&self.path);

        if let Some(mut data) = self.data.take() {
            data.flush()?;
        }

        let mut data = match File::open(&data_path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(FlvError::MissingDataFile(data_path)),
            Err(err) => return Err(err.into()),
        };

        let header = FlvHeader::new(self.stats.audio_codec_id != -1, self.stats.video_codec_id != -1);

        let mut out = io::BufWriter::new(File::create(&self.path)?);
        header.mux(&mut out)?;
        meta_tag.mux(&mut out)?;
        let copied = io::copy(&mut data, &mut out)?;
        out.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;

        Ok(copied)
    }

    fn finalize_append(&mut self, meta_tag: &FlvTag) -> Result<u64, FlvError> {
        let mut file = match self.data.take() {
            Some(file) => file,
            None => OpenOptions::new().read(true).write(true).open(&self.path)?,
        };

        let mut rewritten = 0;

        file.seek(SeekFrom::Start(FIRST_TAG_OFFSET))?;
        let tag_type = FlvTagType::from(file.read_u8()? & 0x1f);
        let body_size = file.read_u24::<BigEndian>()?;

        if tag_type == FlvTagType::ScriptData && body_size == meta_tag.body_size() {
            let mut buf = Vec::with_capacity(meta_tag.muxed_len() as usize);
            meta_tag.mux(&mut buf)?;

            file.seek(SeekFrom::Start(FIRST_TAG_OFFSET))?;
            file.write_all(&buf)?;
            rewritten = buf.len() as u64;
        } else {
            tracing::warn!(
                existing = body_size,
                new = meta_tag.body_size(),
                "metadata size changed, leaving the existing metadata tag in place"
            );
        }

        file.sync_all()?;
        Ok(self.bytes_written - self.initial_length + rewritten)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Writes tags to a file.
///
/// Writes and finalization are serialized by one lock, so the writer can be
/// shared between threads.
pub struct FlvWriter {
    inner: Arc<Mutex<WriterInner>>,
    config: WriterConfig,
    spawner: Option<Arc<dyn Spawner>>,
}

impl std::fmt::Debug for FlvWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlvWriter")
            .field("config", &self.config)
            .field("spawner", &self.spawner.is_some())
            .finish_non_exhaustive()
    }
}

impl FlvWriter {
    fn new(inner: WriterInner, config: WriterConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
            config,
            spawner: Some(Arc::new(ThreadSpawner)),
        }
    }

    /// Start a new file at `path`.
    ///
    /// A data store left over from an earlier session is discarded.
    pub fn create(path: impl Into<PathBuf>, config: WriterConfig) -> Result<Self, FlvError> {
        let path = path.into();
        let data = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path(&path))?;

        tracing::debug!(path = %path.display(), "writing flv");

        Ok(Self::new(
            WriterInner {
                path,
                append: false,
                data: Some(data),
                bytes_written: 0,
                initial_length: 0,
                time_offset: 0,
                stats: WriterInfo::default(),
                last_tag_size: 0,
                started: None,
                buffered: Vec::new(),
                metadata: None,
                finalized: None,
            },
            config,
        ))
    }

    /// Continue writing at the end of the existing file at `path`.
    ///
    /// Timestamps are shifted by the duration of the existing file and its
    /// metadata is used for properties this session cannot fill in.
    pub fn append(path: impl Into<PathBuf>, config: WriterConfig) -> Result<Self, FlvError> {
        let path = path.into();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let length = file.metadata()?.len();
        if length < FIRST_TAG_OFFSET {
            return Err(FlvError::InvalidPath(path));
        }

        let time_offset = get_duration(&path)?;
        let buffered = existing_metadata(&mut file)
            .map(|meta| vec![(UNIX_EPOCH, meta)])
            .unwrap_or_default();

        tracing::debug!(path = %path.display(), time_offset, length, "appending to flv");

        Ok(Self::new(
            WriterInner {
                path,
                append: true,
                data: Some(file),
                bytes_written: length,
                initial_length: length,
                time_offset,
                stats: WriterInfo {
                    duration: time_offset,
                    ..Default::default()
                },
                last_tag_size: 0,
                started: None,
                buffered,
                metadata: None,
                finalized: None,
            },
            config,
        ))
    }

    /// A writer for a data store that was left behind, used by repair. Nothing
    /// is written except the final file.
    pub(crate) fn recover(path: PathBuf, config: WriterConfig) -> Self {
        Self::new(
            WriterInner {
                path,
                append: false,
                data: None,
                bytes_written: 0,
                initial_length: 0,
                time_offset: 0,
                stats: WriterInfo::default(),
                last_tag_size: 0,
                started: None,
                buffered: Vec::new(),
                metadata: None,
                finalized: None,
            },
            config,
        )
        .without_spawner()
    }

    /// Run deferred finalizers on `spawner` instead of a new thread.
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Never defer finalization. [`FlvWriter::close`] reports failures
    /// directly.
    pub fn without_spawner(mut self) -> Self {
        self.spawner = None;
        self
    }

    /// Write a tag.
    ///
    /// `onCuePoint` script tags are written like media tags. `onMetaData`
    /// tags are held back and merged into the metadata written at finalize.
    /// Other script tags are dropped. The info record is updated afterwards,
    /// even when the write failed.
    pub fn write_tag(&self, tag: &FlvTag) -> Result<(), FlvError> {
        let mut inner = self.inner.lock();
        let result = inner.write_tag(tag);
        if inner.finalized.is_none() {
            inner.save_info();
        }
        result
    }

    /// Write a tag stamped with the wall clock time since the first call.
    pub fn write_data(&self, tag_type: FlvTagType, body: impl Into<Bytes>) -> Result<(), FlvError> {
        let timestamp = {
            let mut inner = self.inner.lock();
            let started = *inner.started.get_or_insert_with(Instant::now);
            started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
        };

        self.write_tag(&FlvTag::new(tag_type, timestamp, body))
    }

    /// Assemble the final file.
    ///
    /// Returns the number of bytes moved into it. The sidecar files are only
    /// removed when that is not zero. Finalizing again after a success
    /// returns the earlier result.
    pub fn finalize(&self) -> Result<u64, FlvError> {
        self.inner.lock().finalize(&self.config)
    }

    /// Finalize, waiting at most the configured close timeout for a write in
    /// progress.
    ///
    /// When the lock cannot be taken, finalize fails or moves no data, a
    /// finalizer is handed to the spawner. It deletes the incomplete final
    /// file, waits the configured delay and finalizes again. Without a
    /// spawner the failure is returned instead.
    pub fn close(&self) -> Result<CloseOutcome, FlvError> {
        let failure = match self.inner.try_lock_for(self.config.close_timeout) {
            Some(mut inner) => match inner.finalize(&self.config) {
                Ok(bytes) if bytes > 0 => return Ok(CloseOutcome::Finalized { bytes }),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(path = %inner.path.display(), error = %err, "finalize failed");
                    Some(err)
                }
            },
            None => {
                tracing::warn!(timeout = ?self.config.close_timeout, "timed out waiting for the write lock");
                Some(FlvError::LockTimeout)
            }
        };

        let Some(spawner) = &self.spawner else {
            return match failure {
                Some(err) => Err(err),
                None => Ok(CloseOutcome::Finalized { bytes: 0 }),
            };
        };

        let inner = self.inner.clone();
        let config = self.config.clone();
        spawner.spawn(Box::new(move || run_finalizer(&inner, &config)));

        Ok(CloseOutcome::Deferred)
    }

    /// Bytes in the data store, or in the target for append sessions.
    pub fn bytes_written(&self) -> u64 {
        self.inner.lock().bytes_written
    }

    /// Largest timestamp written so far, in milliseconds.
    pub fn duration(&self) -> u32 {
        self.inner.lock().stats.duration
    }

    /// Size of the last tag written, including its header.
    pub fn last_tag_size(&self) -> u32 {
        self.inner.lock().last_tag_size
    }

    /// Current statistics.
    pub fn info(&self) -> WriterInfo {
        self.inner.lock().stats
    }

    /// The metadata of the last finalize attempt.
    pub fn written_metadata(&self) -> Option<OnMetaData> {
        self.inner.lock().metadata.clone()
    }

    /// Path of the final file.
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }
}

fn run_finalizer(inner: &Mutex<WriterInner>, config: &WriterConfig) {
    let path = {
        let inner = inner.lock();
        if inner.finalized.is_some() {
            tracing::debug!(path = %inner.path.display(), "already finalized, nothing to defer");
            return;
        }

        // under the lock, so a concurrent finalize cannot land in between
        if !inner.append {
            match std::fs::remove_file(&inner.path) {
                Ok(()) => tracing::info!(path = %inner.path.display(), "deleted incomplete file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!(path = %inner.path.display(), error = %err, "failed to delete incomplete file"),
            }
        }

        inner.path.clone()
    };

    std::thread::sleep(config.finalizer_delay);

    match inner.lock().finalize(config) {
        Ok(bytes) => tracing::info!(path = %path.display(), bytes, "deferred finalize done"),
        Err(err) => tracing::error!(path = %path.display(), error = %err, "deferred finalize failed"),
    }
}

/// Reads the metadata tag at the start of a file, leaving the cursor
/// wherever it ends up.
fn existing_metadata(file: &mut File) -> Option<OnMetaData> {
    let mut read = || -> Result<Option<OnMetaData>, FlvError> {
        file.seek(SeekFrom::Start(FIRST_TAG_OFFSET))?;
        if FlvTagType::from(file.read_u8()? & 0x1f) != FlvTagType::ScriptData {
            return Ok(None);
        }

        let body_size = file.read_u24::<BigEndian>()?;
        file.seek(SeekFrom::Current(7))?;

        let mut body = vec![0; body_size as usize];
        file.read_exact(&mut body)?;
        Ok(Some(OnMetaData::from_body(&Bytes::from(body))?))
    };

    read().unwrap_or_else(|err| {
        tracing::debug!(error = %err, "no usable metadata in existing file");
        None
    })
}
