//! Classic Macintosh container and archive decoding
//!
//! Decodes the four container/archive formats used to move Macintosh
//! files (data fork, resource fork, type/creator, Finder flags) across
//! filesystems and networks that only understand a single byte stream:
//!
//! - BinHex 4.0 (`.hqx`) — 6-bit ASCII armor over RLE90 over a CRC-checked header and forks.
//! - MacBinary (`.bin`) — a fixed 128-byte header followed by the two forks, padded to 128 bytes.
//! - StuffIt classic and SIT5 (`.sit`) — a directory of entries, each fork independently compressed.
//! - Compact Pro (`.cpt`) — a recursive directory tree, each fork run through Compact RLE (optionally preceded by LZH).
//!
//! ### Usage
//!
//! Build a base [`layer::Layer`] over a file or an in-memory buffer, then
//! hand it to [`pipeline::run_pipeline`], which detects and unwraps
//! whichever of the four formats (or stack of them, e.g. an HQX-armored
//! SIT archive) the bytes turn out to be:
//!
//! ```no_run
//! use mac_archive::layer::{FileLayer, Layer, OpenWhich};
//! use mac_archive::pipeline::run_pipeline;
//!
//! let base = FileLayer::open("archive.sit.hqx")?;
//! let mut tail = run_pipeline(Box::new(base))?;
//! while let Some(info) = tail.open(OpenWhich::Next)? {
//!     println!("{}: {} bytes", info.filename, info.advisory_len);
//! }
//! # Ok::<(), mac_archive::ParseError>(())
//! ```
//!
//! ### References
//!
//! - [MacBinary I](https://web.archive.org/web/20050307030202/http://www.lazerware.com/formats/macbinary/macbinary.html)
//! - [MacBinary II](https://web.archive.org/web/20050305042909/http://www.lazerware.com/formats/macbinary/macbinary_ii.html)
//! - [MacBinary III](https://web.archive.org/web/20050305044255/http://www.lazerware.com/formats/macbinary/macbinary_iii.html)
//! - [Detecting MacBinary format](https://entropymine.wordpress.com/2019/02/13/detecting-macbinary-format/)

use core::fmt::{self, Display, Formatter};

pub(crate) mod bitreader;
pub(crate) mod compact_rle;
pub mod crc;
pub(crate) mod error;
pub(crate) mod huffman;
pub mod layer;
pub(crate) mod lzh;
pub(crate) mod lzw;
pub(crate) mod macroman;
pub mod pipeline;
pub mod rle90;
pub(crate) mod sit13;
pub(crate) mod sit15;

pub use crate::error::ParseError;
pub use crate::layer::{FileLayer, ForkInfo, ForkType, Layer, MemoryLayer, OpenWhich};
pub use crate::pipeline::run_pipeline;

/// A four-character code
///
/// A 32-bit number that typically holds 4 8-bit ASCII characters, used for type and creator
/// codes, and resource types. Eg. 'mBIN' 'SIZE' 'ICON' 'APPL'.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FourCC(pub u32);

impl Display for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let tag = self.0;
        let bytes = tag.to_be_bytes();
        if bytes.iter().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            let s = core::str::from_utf8(&bytes).unwrap(); // unwrap safe due to above check
            s.fmt(f)
        } else {
            write!(f, "0x{:08x}", tag)
        }
    }
}
