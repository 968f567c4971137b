//! FLV file processing

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, Bytes};

use crate::cache::{CacheStore, NoCache};
use crate::error::FlvError;
use crate::header::FlvHeader;
use crate::keyframe::KeyFrameMetaCache;
use crate::reader::{FlvReader, ReaderConfig};
use crate::script::{ON_META_DATA, OnMetaData, script_name};
use crate::tag::{FlvTag, FlvTagType};
use crate::writer::{FlvWriter, WriterConfig};

/// How many tags [`FlvFile::metadata`] looks at.
const METADATA_SCAN_TAGS: usize = 5;

/// A whole FLV file held in memory: a [`FlvHeader`] followed by the FLV File
/// Body (which is a series of [`FlvTag`]s)
///
/// The FLV File Body is defined by:
/// - Legacy FLV spec, Annex E.3
#[derive(Debug, Clone, PartialEq)]
pub struct FlvContents {
    /// The header of the FLV file.
    pub header: FlvHeader,
    /// The tags in the FLV file.
    pub tags: Vec<FlvTag>,
}

impl FlvContents {
    /// Demux a complete file.
    ///
    /// Unlike [`FlvReader`] this is strict: a bad signature, an unknown
    /// layout or a truncated tag is an error. Tag bodies are sliced out of
    /// the buffer without copying.
    pub fn demux(reader: &mut io::Cursor<Bytes>) -> Result<Self, FlvError> {
        let header = FlvHeader::demux(reader)?;

        let mut tags = Vec::new();
        while reader.has_remaining() {
            let previous_tag_size = reader.read_u32::<BigEndian>()?;

            // the trailer of the last tag
            if !reader.has_remaining() {
                break;
            }

            let tag = FlvTag::demux(reader)?;
            tags.push(FlvTag { previous_tag_size, ..tag });
        }

        Ok(FlvContents { header, tags })
    }
}

/// A file on disk together with the caches used to access it.
pub struct FlvFile {
    path: PathBuf,
    cache: Arc<dyn CacheStore>,
    keyframe_cache: Option<Arc<dyn KeyFrameMetaCache>>,
    generate_metadata: bool,
    writer_config: WriterConfig,
}

impl std::fmt::Debug for FlvFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlvFile")
            .field("path", &self.path)
            .field("generate_metadata", &self.generate_metadata)
            .field("writer_config", &self.writer_config)
            .finish_non_exhaustive()
    }
}

impl FlvFile {
    /// A file at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Arc::new(NoCache),
            keyframe_cache: None,
            generate_metadata: false,
            writer_config: WriterConfig::default(),
        }
    }

    /// Look the file up in `cache` before reading it from disk.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Share keyframe indexes through `cache`.
    pub fn with_keyframe_cache(mut self, cache: Arc<dyn KeyFrameMetaCache>) -> Self {
        self.keyframe_cache = Some(cache);
        self
    }

    /// Have readers inject a synthesized `onMetaData` tag.
    pub fn generate_metadata(mut self, enabled: bool) -> Self {
        self.generate_metadata = enabled;
        self
    }

    /// Options for writers created by this file.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// The path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The key used for the byte cache, which is the file name.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Open a reader.
    ///
    /// Cached bytes are used when there are any. A missing file is created
    /// empty, so the reader simply has no tags.
    pub fn reader(&self) -> Result<FlvReader, FlvError> {
        let config = ReaderConfig::default().generate_metadata(self.generate_metadata);
        let name = self.name();

        if let Some(data) = self.cache.get(&name) {
            tracing::debug!(name = %name, size = data.len(), "reading flv from cache");
            return FlvReader::from_bytes(data, config);
        }

        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "creating missing flv");
            File::create(&self.path)?;
        }

        let reader = FlvReader::open(&self.path, config)?;
        Ok(match &self.keyframe_cache {
            Some(cache) => reader.with_keyframe_cache(cache.clone()),
            None => reader,
        })
    }

    /// Start writing a new file, replacing any existing one.
    pub fn writer(&self) -> Result<FlvWriter, FlvError> {
        self.cache.remove(&self.name());

        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }

        FlvWriter::create(self.path.clone(), self.writer_config.clone())
    }

    /// Continue writing at the end of the file. A missing file is started
    /// with [`FlvFile::writer`].
    pub fn append_writer(&self) -> Result<FlvWriter, FlvError> {
        if !self.path.exists() {
            return self.writer();
        }

        self.cache.remove(&self.name());
        FlvWriter::append(self.path.clone(), self.writer_config.clone())
    }

    /// Offer the file contents to the byte cache. Returns whether the cache
    /// took them.
    pub fn preload(&self) -> Result<bool, FlvError> {
        let data = Bytes::from(std::fs::read(&self.path)?);
        Ok(self.cache.offer(&self.name(), data))
    }

    /// The `onMetaData` of the file, if one of its first tags carries it.
    pub fn metadata(&self) -> Result<Option<OnMetaData>, FlvError> {
        let reader = self.reader()?;

        for _ in 0..METADATA_SCAN_TAGS {
            let Some(tag) = reader.read_tag()? else {
                break;
            };

            if tag.tag_type == FlvTagType::ScriptData && script_name(&tag.body).is_ok_and(|name| name == ON_META_DATA) {
                return OnMetaData::from_body(&tag.body).map(Some);
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::keyframe::MemoryKeyFrameCache;
    use crate::tag::tests::mux_file;

    fn tags() -> Vec<FlvTag> {
        vec![
            FlvTag::new(FlvTagType::Video, 0, Bytes::from_static(&[0x17, 0x00])),
            FlvTag::new(FlvTagType::Audio, 0, Bytes::from_static(&[0xaf, 0x01])),
            FlvTag::new(FlvTagType::Video, 1500, Bytes::from_static(&[0x17, 0x01])),
        ]
    }

    #[test]
    fn demux_contents() {
        let data = Bytes::from(mux_file(&tags()));
        let contents = FlvContents::demux(&mut io::Cursor::new(data)).unwrap();

        assert_eq!(contents.header, FlvHeader::new(true, true));
        assert_eq!(contents.tags.len(), 3);
        assert_eq!(contents.tags[0].previous_tag_size, 0);
        assert_eq!(contents.tags[2].previous_tag_size, 13);
        assert_eq!(contents.tags[2].timestamp, 1500);

        let mut cut = mux_file(&tags());
        cut.truncate(cut.len() - 6);
        assert!(FlvContents::demux(&mut io::Cursor::new(Bytes::from(cut))).is_err());
    }

    #[test]
    fn write_then_read_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let file = FlvFile::new(dir.path().join("file.flv")).writer_config(WriterConfig::default().server("facade"));

        let writer = file.writer().unwrap();
        for tag in tags() {
            writer.write_tag(&tag).unwrap();
        }
        writer.finalize().unwrap();

        let metadata = file.metadata().unwrap().unwrap();
        assert_eq!(metadata.metadata_creator.as_deref(), Some("facade"));
        assert_eq!(metadata.duration, Some(1.5));

        let appender = file.append_writer().unwrap();
        appender
            .write_tag(&FlvTag::new(FlvTagType::Audio, 500, Bytes::from_static(&[0xaf, 0x01])))
            .unwrap();
        appender.finalize().unwrap();

        assert_eq!(file.metadata().unwrap().unwrap().duration, Some(2.0));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = FlvFile::new(dir.path().join("new.flv"));

        let reader = file.reader().unwrap();
        assert!(reader.read_tag().unwrap().is_none());
        assert!(file.path().exists());
        assert_eq!(file.metadata().unwrap(), None);

        let other = FlvFile::new(dir.path().join("other.flv"));
        let writer = other.append_writer().unwrap();
        writer
            .write_tag(&FlvTag::new(FlvTagType::Video, 0, Bytes::from_static(&[0x17])))
            .unwrap();
        writer.finalize().unwrap();
        let meta = other.reader().unwrap().analyze_keyframes().unwrap();
        assert_eq!(meta.timestamps, vec![0]);
        assert_eq!(meta.video_codec_id, 7);
    }

    #[test]
    fn cached_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.flv");
        std::fs::write(&path, mux_file(&tags())).unwrap();

        let cache = Arc::new(MemoryCacheStore::new());
        let file = FlvFile::new(&path).with_cache(cache.clone()).generate_metadata(true);

        assert!(file.preload().unwrap());
        assert!(!file.preload().unwrap());
        std::fs::remove_file(&path).unwrap();

        // served from memory, with the synthesized metadata in front
        let reader = file.reader().unwrap();
        let first = reader.read_tag().unwrap().unwrap();
        assert_eq!(first.tag_type, FlvTagType::ScriptData);
        assert_eq!(OnMetaData::from_body(&first.body).unwrap().duration, Some(1.5));

        file.writer().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn keyframe_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexed.flv");
        std::fs::write(&path, mux_file(&tags())).unwrap();

        let cache = Arc::new(MemoryKeyFrameCache::new());
        let file = FlvFile::new(&path).with_keyframe_cache(cache.clone());

        let meta = file.reader().unwrap().analyze_keyframes().unwrap();
        assert_eq!(meta.timestamps, vec![0, 1500]);
        assert_eq!(cache.len(), 1);
    }
}
