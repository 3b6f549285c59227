//! Base layer over an in-memory byte buffer.

use super::{ForkInfo, ForkType, Layer, OpenWhich};
use crate::error::ParseError;
use crate::FourCC;

/// A base layer wrapping an owned buffer as a single pseudo-fork carrying
/// the raw bytes. Higher layers (HQX, BIN, SIT, CPT) probe and wrap this.
pub struct MemoryLayer {
    data: Vec<u8>,
    pos: usize,
    opened: bool,
}

impl MemoryLayer {
    pub fn new(data: Vec<u8>) -> MemoryLayer {
        MemoryLayer {
            data,
            pos: 0,
            opened: false,
        }
    }
}

impl Layer for MemoryLayer {
    fn open(&mut self, which: OpenWhich) -> Result<Option<ForkInfo>, ParseError> {
        match which {
            OpenWhich::First => {
                self.pos = 0;
                self.opened = true;
                Ok(Some(ForkInfo {
                    filename: String::new(),
                    file_type: FourCC(0),
                    creator: FourCC(0),
                    finder_flags: 0,
                    advisory_len: self.data.len() as u64,
                    fork_type: ForkType::Data,
                }))
            }
            OpenWhich::Next => {
                if !self.opened {
                    return Err(ParseError::Misuse("open(NEXT) before open(FIRST)"));
                }
                Ok(None)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        if !self.opened {
            return Err(ParseError::Misuse("read before open"));
        }
        let remaining = self.data.len() - self.pos;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_first_exposes_whole_buffer_as_one_fork() {
        let mut layer = MemoryLayer::new(vec![1, 2, 3, 4]);
        let info = layer.open(OpenWhich::First).unwrap().unwrap();
        assert_eq!(info.advisory_len, 4);
        assert_eq!(info.fork_type, ForkType::Data);
        assert!(layer.open(OpenWhich::Next).unwrap().is_none());
    }

    #[test]
    fn read_drains_then_returns_zero() {
        let mut layer = MemoryLayer::new(vec![1, 2, 3]);
        layer.open(OpenWhich::First).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(layer.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(layer.read(&mut buf).unwrap(), 1);
        assert_eq!(layer.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn open_first_is_idempotent() {
        let mut layer = MemoryLayer::new(vec![9, 8, 7]);
        layer.open(OpenWhich::First).unwrap();
        let mut buf = [0u8; 1];
        layer.read(&mut buf).unwrap();
        layer.open(OpenWhich::First).unwrap();
        layer.read(&mut buf).unwrap();
        assert_eq!(buf, [9]);
    }

    #[test]
    fn read_before_open_is_misuse() {
        let mut layer = MemoryLayer::new(vec![1]);
        let mut buf = [0u8; 1];
        assert!(matches!(layer.read(&mut buf), Err(ParseError::Misuse(_))));
    }
}
