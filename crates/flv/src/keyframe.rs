//! Keyframe index and its cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

/// Seek points of a file, built by
/// [`FlvReader::analyze_keyframes`](crate::reader::FlvReader::analyze_keyframes).
///
/// For files without video the positions and timestamps of every audio tag are
/// recorded instead.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize))]
pub struct KeyFrameMeta {
    /// Timestamp of the last tag, in milliseconds.
    pub duration: u32,
    /// Whether the file has no video tags.
    pub audio_only: bool,
    /// Codec id of the first video tag, `-1` if there is none.
    pub video_codec_id: i32,
    /// Codec id of the first audio tag, `-1` if there is none.
    pub audio_codec_id: i32,
    /// Byte offsets of the seek points. Each points at the previous-tag-size
    /// field in front of the tag.
    pub positions: Vec<u64>,
    /// Timestamps of the seek points, in milliseconds.
    pub timestamps: Vec<u32>,
}

impl Default for KeyFrameMeta {
    fn default() -> Self {
        Self {
            duration: 0,
            audio_only: true,
            video_codec_id: -1,
            audio_codec_id: -1,
            positions: Vec::new(),
            timestamps: Vec::new(),
        }
    }
}

impl KeyFrameMeta {
    /// Whether there is at least one video keyframe.
    pub fn has_video(&self) -> bool {
        !self.audio_only && !self.positions.is_empty()
    }

    /// The last seek point at or before `timestamp`.
    pub fn seek_point(&self, timestamp: u32) -> Option<(u64, u32)> {
        let idx = self.timestamps.partition_point(|ts| *ts <= timestamp);
        let idx = idx.checked_sub(1)?;
        Some((*self.positions.get(idx)?, self.timestamps[idx]))
    }
}

/// Stores keyframe indexes so files do not have to be scanned again.
pub trait KeyFrameMetaCache: Send + Sync {
    /// Returns the index for `path` if there is a valid one.
    fn load(&self, path: &Path) -> Option<Arc<KeyFrameMeta>>;

    /// Stores the index for `path`.
    fn save(&self, path: &Path, meta: &Arc<KeyFrameMeta>);
}

/// An in-memory [`KeyFrameMetaCache`].
///
/// An entry is dropped when the modification time of its file changes.
#[derive(Debug, Default)]
pub struct MemoryKeyFrameCache {
    entries: RwLock<HashMap<PathBuf, (Option<SystemTime>, Arc<KeyFrameMeta>)>>,
}

impl MemoryKeyFrameCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached indexes.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl KeyFrameMetaCache for MemoryKeyFrameCache {
    fn load(&self, path: &Path) -> Option<Arc<KeyFrameMeta>> {
        let current = modified(path);

        {
            let entries = self.entries.read();
            let (mtime, meta) = entries.get(path)?;
            if *mtime == current {
                return Some(meta.clone());
            }
        }

        tracing::debug!(path = %path.display(), "keyframe cache entry is stale");
        self.entries.write().remove(path);
        None
    }

    fn save(&self, path: &Path, meta: &Arc<KeyFrameMeta>) {
        self.entries.write().insert(path.to_path_buf(), (modified(path), meta.clone()));
    }
}
