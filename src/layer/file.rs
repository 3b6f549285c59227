//! Base layer over a file on disk.
//!
//! Reads the whole file into memory up front and otherwise behaves
//! exactly like [`MemoryLayer`] — there is no partial/streaming read from
//! disk, consistent with the SIT and CPT layers already requiring full
//! in-memory buffering of their archive.

use std::io;
use std::path::Path;

use super::memory::MemoryLayer;
use super::{ForkInfo, Layer, OpenWhich};
use crate::error::ParseError;

pub struct FileLayer {
    inner: MemoryLayer,
}

impl FileLayer {
    pub fn open(path: impl AsRef<Path>) -> io::Result<FileLayer> {
        let data = std::fs::read(path)?;
        Ok(FileLayer {
            inner: MemoryLayer::new(data),
        })
    }
}

impl Layer for FileLayer {
    fn open(&mut self, which: OpenWhich) -> Result<Option<ForkInfo>, ParseError> {
        self.inner.open(which)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        self.inner.read(buf)
    }
}
