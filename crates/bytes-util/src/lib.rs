//! A utility crate for working with bytes.
//!
//! Provides bounds-checked reads on top of [`bytes::Buf`] and zero-copy
//! extraction from [`std::io::Cursor<Bytes>`](bytes::Bytes).
//!
//! ## License
//!
//! This project is licensed under the [MIT](./LICENSE.MIT) or [Apache-2.0](./LICENSE.Apache-2.0) license.
//! You can choose between one of them if you use this work.
//!
//! `SPDX-License-Identifier: MIT OR Apache-2.0`
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(unreachable_pub)]

mod buf;
mod cursor;

pub use buf::{BufExt, NotEnoughData};
pub use cursor::BytesCursorExt;
