//! Script data structures

use bytes::Bytes;
use scuffle_amf::{Amf0Decoder, Amf0Encoder, AmfGraph, AmfMap, AmfObject, AmfValue};

use crate::error::FlvError;

/// Name of the script tag that carries stream metadata.
pub const ON_META_DATA: &str = "onMetaData";

/// Name of the script tag that carries a cue point.
pub const ON_CUE_POINT: &str = "onCuePoint";

/// Reads the leading AMF0 string of a script tag body.
pub fn script_name(body: &Bytes) -> Result<String, FlvError> {
    Ok(Amf0Decoder::new(body.clone()).decode_string()?)
}

/// Decodes `name` followed by an object or associative array and returns the
/// scalar properties in order. Nested values are dropped.
fn decode_properties(body: &Bytes, name: &'static str) -> Result<Vec<(String, AmfValue)>, FlvError> {
    let mut decoder = Amf0Decoder::new(body.clone());

    let got = decoder.decode_string()?;
    if got != name {
        return Err(FlvError::UnexpectedScript { expected: name, got });
    }

    let value = decoder.decode_value()?;
    let graph = decoder.graph();

    let entries: Vec<(String, &AmfValue)> = if let Some(map) = graph.ecma_array(&value) {
        map.iter().map(|(key, value)| (key.to_string(), value)).collect()
    } else if let Some(object) = graph.object(&value) {
        object.iter().map(|(key, value)| (key.to_owned(), value)).collect()
    } else {
        return Err(scuffle_amf::AmfError::UnexpectedType {
            expected: "object or associative array",
            got: value.kind(),
        }
        .into());
    };

    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| {
            if value.node().is_some() {
                tracing::debug!(key = %key, "skipping nested script data property");
                None
            } else {
                Some((key, value.clone()))
            }
        })
        .collect())
}

/// Reads a codec id that is either a number or a four character alias.
fn codec_id(value: &AmfValue) -> Option<i32> {
    match value {
        AmfValue::String(alias) if alias == "avc1" => Some(7),
        AmfValue::String(alias) if alias == "mp4a" => Some(10),
        other => other.as_f64().filter(|n| n.fract() == 0.0).map(|n| n as i32),
    }
}

fn codec_alias(id: i32, alias_for: i32, alias: &str) -> AmfValue {
    if id == alias_for {
        AmfValue::from(alias)
    } else {
        AmfValue::Number(f64::from(id))
    }
}

/// FLV `onMetaData` script data
///
/// Defined by:
/// - Legacy FLV spec, Annex E.5
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize))]
pub struct OnMetaData {
    /// Name of the software that wrote the file.
    pub metadata_creator: Option<String>,
    /// Creation date, in milliseconds since the epoch.
    pub creation_date: Option<f64>,
    /// Total duration of the file, in seconds.
    pub duration: Option<f64>,
    /// Video codec ID used in the file.
    pub video_codec_id: Option<i32>,
    /// Video bitrate, in kilobits per second.
    pub video_data_rate: Option<f64>,
    /// Audio codec ID used in the file.
    pub audio_codec_id: Option<i32>,
    /// Audio bitrate, in kilobits per second.
    pub audio_data_rate: Option<f64>,
    /// Frequency at which the audio stream is replayed.
    pub audio_sample_rate: Option<f64>,
    /// Resolution of a single audio sample.
    pub audio_sample_size: Option<f64>,
    /// Indicates stereo audio.
    pub stereo: Option<bool>,
    /// Width of the video, in pixels.
    pub width: Option<f64>,
    /// Height of the video, in pixels.
    pub height: Option<f64>,
    /// Number of frames per second.
    pub framerate: Option<f64>,
    /// Indicating the last video frame is a key frame.
    pub can_seek_to_end: Option<bool>,
    /// Any other scalar metadata contained in the script data.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_properties"))]
    pub other: Vec<(String, AmfValue)>,
}

impl OnMetaData {
    /// Parse an `onMetaData` tag body.
    pub fn from_body(body: &Bytes) -> Result<Self, FlvError> {
        let mut meta = OnMetaData::default();

        for (key, value) in decode_properties(body, ON_META_DATA)? {
            match (key.as_str(), &value, value.as_f64()) {
                ("metadatacreator", AmfValue::String(creator), _) => meta.metadata_creator = Some(creator.clone()),
                ("creationdate", AmfValue::Date(millis), _) => meta.creation_date = Some(*millis),
                ("duration", _, Some(n)) => meta.duration = Some(n),
                ("videocodecid", value, _) if codec_id(value).is_some() => meta.video_codec_id = codec_id(value),
                ("videodatarate", _, Some(n)) => meta.video_data_rate = Some(n),
                ("audiocodecid", value, _) if codec_id(value).is_some() => meta.audio_codec_id = codec_id(value),
                ("audiodatarate", _, Some(n)) => meta.audio_data_rate = Some(n),
                ("audiosamplerate", _, Some(n)) => meta.audio_sample_rate = Some(n),
                ("audiosamplesize", _, Some(n)) => meta.audio_sample_size = Some(n),
                ("stereo", AmfValue::Boolean(stereo), _) => meta.stereo = Some(*stereo),
                ("width", _, Some(n)) => meta.width = Some(n),
                ("height", _, Some(n)) => meta.height = Some(n),
                ("framerate", _, Some(n)) => meta.framerate = Some(n),
                ("canSeekToEnd", AmfValue::Boolean(can_seek), _) => meta.can_seek_to_end = Some(*can_seek),
                _ => meta.other.push((key.clone(), value.clone())),
            }
        }

        Ok(meta)
    }

    /// Encode as an `onMetaData` tag body.
    ///
    /// Codec 7 is written as `avc1` and codec 10 as `mp4a`. A missing codec is
    /// written as a `novideocodec` or `noaudiocodec` placeholder.
    pub fn to_body(&self) -> Result<Bytes, FlvError> {
        let mut map = AmfMap::new();

        if let Some(creator) = &self.metadata_creator {
            map.insert("metadatacreator", creator.as_str());
        }
        if let Some(date) = self.creation_date {
            map.insert("creationdate", AmfValue::Date(date));
        }
        if let Some(duration) = self.duration {
            map.insert("duration", duration);
        }

        match self.video_codec_id {
            Some(id) => {
                map.insert("videocodecid", codec_alias(id, 7, "avc1"));
                if let Some(rate) = self.video_data_rate {
                    map.insert("videodatarate", rate);
                }
            }
            None if !self.has("novideocodec") => {
                map.insert("novideocodec", 0.0);
            }
            None => {}
        }

        match self.audio_codec_id {
            Some(id) => {
                map.insert("audiocodecid", codec_alias(id, 10, "mp4a"));
                if let Some(rate) = self.audio_sample_rate {
                    map.insert("audiosamplerate", rate);
                }
                if let Some(size) = self.audio_sample_size {
                    map.insert("audiosamplesize", size);
                }
                if let Some(stereo) = self.stereo {
                    map.insert("stereo", stereo);
                }
                if let Some(rate) = self.audio_data_rate {
                    map.insert("audiodatarate", rate);
                }
            }
            None if !self.has("noaudiocodec") => {
                map.insert("noaudiocodec", 0.0);
            }
            None => {}
        }

        for (key, value) in [("width", self.width), ("height", self.height), ("framerate", self.framerate)] {
            if let Some(value) = value {
                map.insert(key, value);
            }
        }
        if let Some(can_seek) = self.can_seek_to_end {
            map.insert("canSeekToEnd", can_seek);
        }
        for (key, value) in &self.other {
            map.insert(key.as_str(), value.clone());
        }

        encode_script(ON_META_DATA, map)
    }

    /// Fill every property that is not set from `other`.
    ///
    /// Properties present on both sides keep the value of `self`.
    pub fn fill_from(&mut self, other: &OnMetaData) {
        macro_rules! fill {
            ($($field:ident),*) => {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field.clone();
                    }
                )*
            };
        }

        fill!(
            metadata_creator,
            creation_date,
            duration,
            video_codec_id,
            video_data_rate,
            audio_codec_id,
            audio_data_rate,
            audio_sample_rate,
            audio_sample_size,
            stereo,
            width,
            height,
            framerate,
            can_seek_to_end
        );

        for (key, value) in &other.other {
            if !self.has(key) {
                self.other.push((key.clone(), value.clone()));
            }
        }
    }

    /// Looks up a property in [`OnMetaData::other`].
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.other.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

pub(crate) fn encode_script(name: &str, map: impl Into<scuffle_amf::AmfNode>) -> Result<Bytes, FlvError> {
    let mut graph = AmfGraph::new();
    let id = graph.insert(map);

    let mut encoder = Amf0Encoder::new(Vec::new());
    encoder.encode_string(name)?;
    encoder.encode_value(&graph, &AmfValue::Ref(id))?;

    Ok(Bytes::from(encoder.into_inner()))
}

#[cfg(feature = "serde")]
fn serialize_properties<S>(properties: &[(String, AmfValue)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;

    let graph = AmfGraph::new();
    let mut map = serializer.serialize_map(Some(properties.len()))?;
    for (key, value) in properties {
        map.serialize_entry(key, &graph.serializable(value))?;
    }
    map.end()
}

/// An `onCuePoint` marker embedded in the stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaCue {
    /// Name of the cue point.
    pub name: String,
    /// Kind of cue point, usually `event` or `navigation`.
    pub cue_type: String,
    /// Position in seconds.
    pub time: f64,
    /// Any other scalar property.
    pub properties: Vec<(String, AmfValue)>,
}

impl MetaCue {
    /// Create a cue point without extra properties.
    pub fn new(name: impl Into<String>, cue_type: impl Into<String>, time: f64) -> Self {
        Self {
            name: name.into(),
            cue_type: cue_type.into(),
            time,
            properties: Vec::new(),
        }
    }

    /// Parse an `onCuePoint` tag body.
    pub fn from_body(body: &Bytes) -> Result<Self, FlvError> {
        let mut cue = MetaCue::default();

        for (key, value) in decode_properties(body, ON_CUE_POINT)? {
            match (key.as_str(), &value, value.as_f64()) {
                ("name", AmfValue::String(name), _) => cue.name = name.clone(),
                ("type", AmfValue::String(cue_type), _) => cue.cue_type = cue_type.clone(),
                ("time", _, Some(time)) => cue.time = time,
                _ => cue.properties.push((key.clone(), value.clone())),
            }
        }

        Ok(cue)
    }

    /// Encode as an `onCuePoint` tag body.
    pub fn to_body(&self) -> Result<Bytes, FlvError> {
        let mut object = AmfObject::new();
        object.insert("name", self.name.as_str());
        object.insert("type", self.cue_type.as_str());
        object.insert("time", self.time);
        for (key, value) in &self.properties {
            object.insert(key.as_str(), value.clone());
        }

        encode_script(ON_CUE_POINT, object)
    }

    /// Orders cue points by time.
    pub fn cmp_time(&self, other: &MetaCue) -> std::cmp::Ordering {
        self.time.total_cmp(&other.time)
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trip() {
        let meta = OnMetaData {
            metadata_creator: Some("scuffle".into()),
            duration: Some(12.5),
            video_codec_id: Some(7),
            video_data_rate: Some(800.0),
            audio_codec_id: Some(10),
            audio_sample_rate: Some(44100.0),
            audio_sample_size: Some(16.0),
            stereo: Some(true),
            can_seek_to_end: Some(true),
            other: vec![("encoder".into(), AmfValue::from("obs"))],
            ..Default::default()
        };

        let body = meta.to_body().unwrap();
        assert_eq!(script_name(&body).unwrap(), ON_META_DATA);
        assert_eq!(OnMetaData::from_body(&body).unwrap(), meta);

        let mut decoder = Amf0Decoder::new(body);
        decoder.decode_string().unwrap();
        let value = decoder.decode_value().unwrap();
        let map = decoder.graph().ecma_array(&value).unwrap();
        assert_eq!(map.get_str("videocodecid"), Some(&AmfValue::from("avc1")));
        assert_eq!(map.get_str("audiocodecid"), Some(&AmfValue::from("mp4a")));
    }

    #[test]
    fn placeholders_for_missing_codecs() {
        let meta = OnMetaData {
            duration: Some(1.0),
            ..Default::default()
        };

        let decoded = OnMetaData::from_body(&meta.to_body().unwrap()).unwrap();
        assert_eq!(decoded.get("novideocodec"), Some(&AmfValue::Number(0.0)));
        assert_eq!(decoded.get("noaudiocodec"), Some(&AmfValue::Number(0.0)));

        // the placeholders are not written twice
        let again = OnMetaData::from_body(&decoded.to_body().unwrap()).unwrap();
        assert_eq!(again.other.len(), 2);
    }

    #[test]
    fn numeric_codec_ids() {
        let meta = OnMetaData {
            video_codec_id: Some(4),
            audio_codec_id: Some(2),
            ..Default::default()
        };

        let decoded = OnMetaData::from_body(&meta.to_body().unwrap()).unwrap();
        assert_eq!(decoded.video_codec_id, Some(4));
        assert_eq!(decoded.audio_codec_id, Some(2));
    }

    #[test]
    fn fill_keeps_own_values() {
        let mut meta = OnMetaData {
            duration: Some(10.0),
            ..Default::default()
        };
        let buffered = OnMetaData {
            duration: Some(3.0),
            width: Some(1280.0),
            height: Some(720.0),
            other: vec![("title".into(), AmfValue::from("demo"))],
            ..Default::default()
        };

        meta.fill_from(&buffered);
        meta.fill_from(&buffered);

        assert_eq!(meta.duration, Some(10.0));
        assert_eq!(meta.width, Some(1280.0));
        assert_eq!(meta.height, Some(720.0));
        assert_eq!(meta.other, vec![("title".to_owned(), AmfValue::from("demo"))]);
    }

    #[test]
    fn wrong_script_name() {
        let cue = MetaCue::new("chapter", "navigation", 1.5).to_body().unwrap();

        let err = OnMetaData::from_body(&cue).unwrap_err();
        assert!(matches!(err, FlvError::UnexpectedScript { expected: ON_META_DATA, ref got } if got == ON_CUE_POINT));
    }

    #[test]
    fn cue_point() {
        let mut cue = MetaCue::new("chapter", "navigation", 1.5);
        cue.properties.push(("chapter".into(), AmfValue::Number(2.0)));

        let body = cue.to_body().unwrap();
        assert_eq!(script_name(&body).unwrap(), ON_CUE_POINT);

        let decoded = MetaCue::from_body(&body).unwrap();
        assert_eq!(decoded, cue);
        assert!(MetaCue::new("a", "event", 0.5).cmp_time(&decoded).is_lt());
    }

    #[test]
    fn not_a_script() {
        assert!(script_name(&Bytes::from_static(&[0x00, 0, 0, 0, 0, 0, 0, 0, 0])).is_err());
    }
}
