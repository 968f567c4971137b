//! A pure Rust implementation of the FLV container, with a tolerant tag
//! reader, keyframe indexing and a writer whose recordings survive a crash.
//!
//! Script data (`onMetaData`, `onCuePoint`) is encoded with
//! [`scuffle_amf`].
//!
//! ## Reading
//!
//! [`reader::FlvReader`] reads tags one at a time. It skips over a few bytes
//! of garbage between tags, clips a truncated last tag and can build a
//! keyframe index for seeking ([`reader::FlvReader::analyze_keyframes`]).
//!
//! ```rust,no_run
//! # fn test() -> Result<(), scuffle_flv::error::FlvError> {
//! use scuffle_flv::reader::{FlvReader, ReaderConfig};
//!
//! let reader = FlvReader::open("recording.flv", ReaderConfig::default())?;
//! reader.seek_to_keyframe(60_000)?;
//! while let Some(tag) = reader.read_tag()? {
//!     println!("{:?} at {}ms", tag.tag_type, tag.timestamp);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing
//!
//! [`writer::FlvWriter`] writes tags to `<path>.ser` and keeps its
//! statistics in `<path>.info`. Closing the writer assembles the final file
//! with a header and an `onMetaData` tag. If that never happens, the
//! leftovers can be turned into a playable file with [`repair::repair`].
//!
//! ```rust,no_run
//! # fn test() -> Result<(), scuffle_flv::error::FlvError> {
//! use scuffle_flv::tag::{FlvTag, FlvTagType};
//! use scuffle_flv::writer::{FlvWriter, WriterConfig};
//!
//! let writer = FlvWriter::create("recording.flv", WriterConfig::default())?;
//! writer.write_tag(&FlvTag::new(FlvTagType::Audio, 0, vec![0xaf, 0x01]))?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Specifications
//!
//! | Name | Version | Link | Comments |
//! | --- | --- | --- | --- |
//! | Video File Format Specification | `10` | <https://github.com/veovera/enhanced-rtmp/blob/main/docs/legacy/video-file-format-v10-0-spec.pdf> | |
//! | Adobe Flash Video File Format Specification | `10.1` | <https://github.com/veovera/enhanced-rtmp/blob/main/docs/legacy/video-file-format-v10-1-spec.pdf> | Refered to as 'Legacy FLV spec' in this documentation |
//!
//! ## License
//!
//! This project is licensed under the [MIT](./LICENSE.MIT) or [Apache-2.0](./LICENSE.Apache-2.0) license.
//! You can choose between one of them if you use this work.
//!
//! `SPDX-License-Identifier: MIT OR Apache-2.0`
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(unreachable_pub)]

pub mod audio;
pub mod cache;
pub mod duration;
pub mod error;
pub mod file;
pub mod header;
pub mod info;
pub mod keyframe;
pub mod reader;
pub mod repair;
pub mod script;
pub mod spawn;
pub mod tag;
pub mod video;
pub mod writer;
