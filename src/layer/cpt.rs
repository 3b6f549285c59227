//! Compact Pro layer.
//!
//! Like SIT, the directory is a random-access structure, so the whole
//! archive is buffered (`super::read_all`) before the recursive entry
//! walk that builds the flat file list this layer iterates over.

use super::{ForkInfo, ForkType, Layer, OpenWhich};
use crate::crc::{crc32_final_xor, crc32_no_final_xor};
use crate::error::ParseError;
use crate::macroman::FromMacRoman;
use crate::FourCC;

const MAX_DIR_OFFSET: usize = 64 * 1024 * 1024;

fn looks_like_cpt(bytes: &[u8]) -> bool {
    if bytes.len() < 8 {
        return false;
    }
    if bytes[0] != 0x01 || bytes[1] != 0x01 {
        return false;
    }
    let dir_offset = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
    (8..MAX_DIR_OFFSET).contains(&dir_offset)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).ok_or(ParseError::Overflow)?;
        let slice = self.data.get(self.pos..end).ok_or(ParseError::BadEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn seek(&mut self, pos: usize) -> Result<(), ParseError> {
        if pos > self.data.len() {
            return Err(ParseError::BadOffset);
        }
        self.pos = pos;
        Ok(())
    }

    fn at(&self) -> usize {
        self.pos
    }
}

#[derive(Debug, Clone)]
struct FileEntry {
    path: String,
    file_type: FourCC,
    creator: FourCC,
    finder_flags: u16,
    rsrc_uses_lzh: bool,
    data_uses_lzh: bool,
    rsrc_comp_len: u32,
    data_comp_len: u32,
    rsrc_uncomp_len: u32,
    data_uncomp_len: u32,
    uncompressed_crc32: u32,
    file_offset: usize,
}

fn walk_entries(
    cur: &mut Cursor,
    parent_path: &str,
    remaining: &mut u32,
    out: &mut Vec<FileEntry>,
) -> Result<(), ParseError> {
    while *remaining > 0 {
        let nt = cur.u8()?;
        let name_len = usize::from(nt & 0x7F);
        let is_dir = nt & 0x80 != 0;
        let name = String::from_macroman(cur.take(name_len)?);

        let mut path = parent_path.to_string();
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&name);

        if is_dir {
            let mut subtree_count = u32::from(cur.u16()?);
            *remaining = remaining.saturating_sub(1 + subtree_count);
            walk_entries(cur, &path, &mut subtree_count, out)?;
        } else {
            let meta = cur.take(45)?;
            let file_offset = u32::from_be_bytes(meta[1..5].try_into().unwrap()) as usize;
            let file_type = FourCC(u32::from_be_bytes(meta[5..9].try_into().unwrap()));
            let creator = FourCC(u32::from_be_bytes(meta[9..13].try_into().unwrap()));
            let finder_flags = u16::from_be_bytes(meta[21..23].try_into().unwrap());
            let uncompressed_crc32 = u32::from_be_bytes(meta[23..27].try_into().unwrap());
            let file_flags = u16::from_be_bytes(meta[27..29].try_into().unwrap());
            let rsrc_uncomp_len = u32::from_be_bytes(meta[29..33].try_into().unwrap());
            let data_uncomp_len = u32::from_be_bytes(meta[33..37].try_into().unwrap());
            let rsrc_comp_len = u32::from_be_bytes(meta[37..41].try_into().unwrap());
            let data_comp_len = u32::from_be_bytes(meta[41..45].try_into().unwrap());

            if file_flags & 0b001 != 0 {
                return Err(ParseError::Unsupported("compact pro encrypted entry"));
            }

            out.push(FileEntry {
                path,
                file_type,
                creator,
                finder_flags,
                rsrc_uses_lzh: file_flags & 0b010 != 0,
                data_uses_lzh: file_flags & 0b100 != 0,
                rsrc_comp_len,
                data_comp_len,
                rsrc_uncomp_len,
                data_uncomp_len,
                uncompressed_crc32,
                file_offset,
            });
            *remaining = remaining.saturating_sub(1);
        }
    }
    Ok(())
}

fn parse_archive(buf: &[u8]) -> Result<Vec<FileEntry>, ParseError> {
    let dir_offset = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
    let mut cur = Cursor::new(buf);
    cur.seek(dir_offset)?;

    let _dir_crc = cur.u32()?;
    let mut total_entries = u32::from(cur.u16()?);
    let comment_len = usize::from(cur.u8()?);
    cur.take(comment_len)?;

    let mut entries = Vec::new();
    walk_entries(&mut cur, "", &mut total_entries, &mut entries)?;
    Ok(entries)
}

fn decode_fork(bytes: &[u8], uncomp_len: u32, uses_lzh: bool) -> Result<Vec<u8>, ParseError> {
    let expected = uncomp_len as usize;
    let rle_input: std::borrow::Cow<[u8]> = if uses_lzh {
        // LZH's own uncompressed length isn't recorded separately; it feeds
        // straight into Compact RLE, so give it enough room to not truncate.
        std::borrow::Cow::Owned(crate::lzh::decode(bytes, expected.max(bytes.len()))?)
    } else {
        std::borrow::Cow::Borrowed(bytes)
    };
    crate::compact_rle::decode(&rle_input, expected)
}

enum Stage {
    BeforeEntry(usize),
    InData { entry: usize, pos: usize },
    AfterData(usize),
    InRsrc { entry: usize, pos: usize },
    Done,
}

pub struct CptLayer {
    entries: Vec<FileEntry>,
    decoded_data: Vec<Option<Vec<u8>>>,
    decoded_rsrc: Vec<Option<Vec<u8>>>,
    buf: Vec<u8>,
    stage: Stage,
}

impl CptLayer {
    fn ensure_data(&mut self, idx: usize) -> Result<(), ParseError> {
        if self.decoded_data[idx].is_some() {
            return Ok(());
        }
        let e = &self.entries[idx];
        let data_start = e.file_offset + e.rsrc_comp_len as usize;
        let bytes = self
            .buf
            .get(data_start..data_start + e.data_comp_len as usize)
            .ok_or(ParseError::BadEof)?;
        let decoded = decode_fork(bytes, e.data_uncomp_len, e.data_uses_lzh)?;
        self.decoded_data[idx] = Some(decoded);
        Ok(())
    }

    fn ensure_rsrc(&mut self, idx: usize) -> Result<(), ParseError> {
        if self.decoded_rsrc[idx].is_some() {
            return Ok(());
        }
        let e = &self.entries[idx];
        let bytes = self
            .buf
            .get(e.file_offset..e.file_offset + e.rsrc_comp_len as usize)
            .ok_or(ParseError::BadEof)?;
        let decoded = decode_fork(bytes, e.rsrc_uncomp_len, e.rsrc_uses_lzh)?;
        self.decoded_rsrc[idx] = Some(decoded);
        Ok(())
    }

    fn verify_crc(&self, idx: usize) -> Result<(), ParseError> {
        let e = &self.entries[idx];
        let mut whole = Vec::with_capacity((e.rsrc_uncomp_len + e.data_uncomp_len) as usize);
        if let Some(r) = &self.decoded_rsrc[idx] {
            whole.extend_from_slice(r);
        }
        if let Some(d) = &self.decoded_data[idx] {
            whole.extend_from_slice(d);
        }
        let ok = crc32_final_xor(&whole) == e.uncompressed_crc32 || crc32_no_final_xor(&whole) == e.uncompressed_crc32;
        if ok {
            Ok(())
        } else {
            Err(ParseError::CrcMismatch)
        }
    }
}

impl Layer for CptLayer {
    fn open(&mut self, which: OpenWhich) -> Result<Option<ForkInfo>, ParseError> {
        match which {
            OpenWhich::First => {
                self.stage = Stage::BeforeEntry(0);
                self.open(OpenWhich::Next)
            }
            OpenWhich::Next => loop {
                match self.stage {
                    Stage::BeforeEntry(idx) => {
                        if idx >= self.entries.len() {
                            self.stage = Stage::Done;
                            continue;
                        }
                        let e = &self.entries[idx];
                        if e.data_uncomp_len > 0 {
                            let filename = e.path.clone();
                            let file_type = e.file_type;
                            let creator = e.creator;
                            let finder_flags = e.finder_flags;
                            let advisory_len = u64::from(e.data_uncomp_len);
                            self.ensure_data(idx)?;
                            self.stage = Stage::InData { entry: idx, pos: 0 };
                            return Ok(Some(ForkInfo {
                                filename,
                                file_type,
                                creator,
                                finder_flags,
                                advisory_len,
                                fork_type: ForkType::Data,
                            }));
                        }
                        self.stage = Stage::AfterData(idx);
                    }
                    Stage::InData { entry, .. } => {
                        self.stage = Stage::AfterData(entry);
                    }
                    Stage::AfterData(idx) => {
                        let e = &self.entries[idx];
                        if e.rsrc_uncomp_len > 0 {
                            let filename = e.path.clone();
                            let file_type = e.file_type;
                            let creator = e.creator;
                            let finder_flags = e.finder_flags;
                            let advisory_len = u64::from(e.rsrc_uncomp_len);
                            self.ensure_rsrc(idx)?;
                            self.stage = Stage::InRsrc { entry: idx, pos: 0 };
                            return Ok(Some(ForkInfo {
                                filename,
                                file_type,
                                creator,
                                finder_flags,
                                advisory_len,
                                fork_type: ForkType::Resource,
                            }));
                        }
                        self.verify_crc(idx)?;
                        self.stage = Stage::BeforeEntry(idx + 1);
                    }
                    Stage::InRsrc { entry, .. } => {
                        self.verify_crc(entry)?;
                        self.stage = Stage::BeforeEntry(entry + 1);
                    }
                    Stage::Done => return Ok(None),
                }
            },
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        match &mut self.stage {
            Stage::InData { entry, pos } => {
                let data = self.decoded_data[*entry].as_ref().unwrap();
                let n = (data.len() - *pos).min(buf.len());
                buf[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            Stage::InRsrc { entry, pos } => {
                let data = self.decoded_rsrc[*entry].as_ref().unwrap();
                let n = (data.len() - *pos).min(buf.len());
                buf[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            _ => Err(ParseError::Misuse("read before successful open")),
        }
    }
}

/// Probe `inner` for a Compact Pro archive; if found, parse its directory
/// eagerly and wrap it in a [`CptLayer`].
pub fn try_open(mut inner: Box<dyn Layer>) -> Result<super::Probe, ParseError> {
    inner.open(OpenWhich::First)?;
    let peek = super::read_bounded(inner.as_mut(), 8)?;
    inner.open(OpenWhich::First)?;

    if !looks_like_cpt(&peek) {
        return Ok(super::Probe::NoMatch(inner));
    }

    inner.open(OpenWhich::First)?;
    let buf = super::read_all(inner.as_mut())?;

    let entries = match parse_archive(&buf) {
        Ok(e) => e,
        Err(_) => {
            inner.open(OpenWhich::First)?;
            return Ok(super::Probe::NoMatch(inner));
        }
    };

    let count = entries.len();
    Ok(super::Probe::Matched(Box::new(CptLayer {
        entries,
        decoded_data: vec![None; count],
        decoded_rsrc: vec![None; count],
        buf,
        stage: Stage::BeforeEntry(0),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::MemoryLayer;

    fn build_one_file(name: &str, data_plain: &[u8], encoded: &[u8]) -> Vec<u8> {
        let mut header = vec![0u8; 8];
        header[0] = 0x01;
        header[1] = 0x01;

        let file_offset = 8usize;
        let mut meta = vec![0u8; 45];
        meta[1..5].copy_from_slice(&(file_offset as u32).to_be_bytes());
        meta[5..9].copy_from_slice(b"TEXT");
        meta[9..13].copy_from_slice(b"ttxt");
        let crc = crc32_final_xor(data_plain);
        meta[23..27].copy_from_slice(&crc.to_be_bytes());
        // file_flags = 0: no encryption, no LZH.
        meta[33..37].copy_from_slice(&(data_plain.len() as u32).to_be_bytes());
        meta[41..45].copy_from_slice(&(encoded.len() as u32).to_be_bytes());

        let dir_offset = file_offset + encoded.len();
        header[4..8].copy_from_slice(&(dir_offset as u32).to_be_bytes());

        let mut dir = vec![0u8; 4]; // dir crc, unchecked here
        dir.extend_from_slice(&1u16.to_be_bytes()); // total entry count
        dir.push(0); // comment length
        let nt = name.len() as u8; // not a directory
        dir.push(nt);
        dir.extend_from_slice(name.as_bytes());
        dir.extend_from_slice(&meta);

        let mut out = header;
        out.extend_from_slice(encoded);
        out.extend_from_slice(&dir);
        out
    }

    #[test]
    fn try_open_rejects_non_cpt_input() {
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(vec![0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(!try_open(layer).unwrap().is_match());
    }

    #[test]
    fn s3_compact_rle_only_fork_decodes() {
        let plain = vec![0x41u8, 0x41, 0x41, 0x41];
        let encoded = [0x41u8, 0x81, 0x82, 0x05];
        let bytes = build_one_file("f", &plain, &encoded);
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(bytes));
        let mut cpt = try_open(layer).unwrap().matched().unwrap();

        let info = cpt.open(OpenWhich::First).unwrap().unwrap();
        assert_eq!(info.fork_type, ForkType::Data);
        assert_eq!(info.advisory_len, 4);
        let mut buf = vec![0u8; 4];
        assert_eq!(cpt.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, plain);
        assert!(cpt.open(OpenWhich::Next).unwrap().is_none());
    }
}
