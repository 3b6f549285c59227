//! StuffIt classic and SIT5 layer.
//!
//! Both directory formats require random access, so once the magic is
//! identified the whole remainder of the containing fork is buffered into
//! memory (`super::read_all`) and walked with plain slice cursors, the
//! same style `lzh.rs`/`sit13.rs` use for their own bitstreams.

use super::{ForkInfo, ForkType, Layer, OpenWhich};
use crate::crc::crc16_sit;
use crate::error::ParseError;
use crate::macroman::FromMacRoman;
use crate::FourCC;

const CLASSIC_SIGNATURES: [[u8; 4]; 9] = [
    *b"SIT!", *b"ST46", *b"ST50", *b"ST60", *b"ST65", *b"STin", *b"STi2", *b"STi3", *b"STi4",
];
const SIT5_MAGIC_PREFIX: &[u8] = b"StuffIt (c)1997-";
const SIT5_MAGIC_SUFFIX: &[u8] = b" Aladdin Systems, Inc., http://www.aladdinsys.com/StuffIt/";

fn looks_like_classic(bytes: &[u8]) -> bool {
    if bytes.len() < 14 {
        return false;
    }
    let sig = &bytes[0..4];
    CLASSIC_SIGNATURES.iter().any(|s| s == sig) && &bytes[10..14] == b"rLau"
}

fn looks_like_sit5(bytes: &[u8]) -> bool {
    if bytes.len() < 80 {
        return false;
    }
    bytes[0..SIT5_MAGIC_PREFIX.len()] == *SIT5_MAGIC_PREFIX
        && bytes[16..20].iter().all(u8::is_ascii_digit)
        && &bytes[20..20 + SIT5_MAGIC_SUFFIX.len()] == SIT5_MAGIC_SUFFIX
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
    data_method: u8,
    data_comp_len: u32,
    data_uncomp_len: u32,
    data_crc: u16,
    rsrc_method: u8,
    rsrc_comp_len: u32,
    rsrc_uncomp_len: u32,
    rsrc_crc: u16,
    data_offset: usize,
    rsrc_offset: usize,
}

fn decode_fork(method: u8, bytes: &[u8], uncomp_len: u32) -> Result<Vec<u8>, ParseError> {
    let expected = uncomp_len as usize;
    match method & 0x0F {
        0 => {
            if bytes.len() != expected {
                return Err(ParseError::BadValue);
            }
            Ok(bytes.to_vec())
        }
        1 => crate::rle90::decode(bytes, expected),
        2 => crate::lzw::decode(bytes, expected),
        13 => crate::sit13::decode(bytes, expected),
        15 => crate::sit15::decode(bytes, expected),
        _ => Err(ParseError::Unsupported("stuffit compression method")),
    }
}

fn parse_classic(buf: &[u8]) -> Result<Vec<FileEntry>, ParseError> {
    let mut cur = Cursor::new(buf);
    cur.seek(22)?;

    let mut entries = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    while cur.at() + 112 <= buf.len() {
        let entry_start = cur.at();
        let header = cur.take(112)?;
        let rsrc_method = header[0];
        let data_method = header[1];
        let name_len = usize::from(header[2]).min(63);
        let name = String::from_macroman(&header[3..3 + name_len]);

        if data_method == 32 {
            stack.push(name);
            continue;
        }
        if data_method == 33 {
            stack.pop();
            continue;
        }

        let file_type = FourCC(u32::from_be_bytes(header[66..70].try_into().unwrap()));
        let creator = FourCC(u32::from_be_bytes(header[70..74].try_into().unwrap()));
        let finder_flags = u16::from_be_bytes(header[74..76].try_into().unwrap());
        let rsrc_uncomp_len = u32::from_be_bytes(header[82..86].try_into().unwrap());
        let data_uncomp_len = u32::from_be_bytes(header[86..90].try_into().unwrap());
        let rsrc_comp_len = u32::from_be_bytes(header[90..94].try_into().unwrap());
        let data_comp_len = u32::from_be_bytes(header[94..98].try_into().unwrap());
        let rsrc_crc = u16::from_be_bytes(header[98..100].try_into().unwrap());
        let data_crc = u16::from_be_bytes(header[100..102].try_into().unwrap());
        let header_crc = u16::from_be_bytes(header[110..112].try_into().unwrap());

        let mut crc_input = header.to_vec();
        crc_input[110] = 0;
        crc_input[111] = 0;
        if crc16_sit(&crc_input[..110]) != header_crc {
            return Err(ParseError::CrcMismatch);
        }

        let rsrc_offset = entry_start + 112;
        let data_offset = rsrc_offset + rsrc_comp_len as usize;

        let mut path = stack.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&name);

        entries.push(FileEntry {
            path,
            file_type,
            creator,
            finder_flags,
            data_method,
            data_comp_len,
            data_uncomp_len,
            data_crc,
            rsrc_method,
            rsrc_comp_len,
            rsrc_uncomp_len,
            rsrc_crc,
            data_offset,
            rsrc_offset,
        });

        cur.seek(data_offset + data_comp_len as usize)?;
    }

    Ok(entries)
}

fn parse_sit5(buf: &[u8]) -> Result<Vec<FileEntry>, ParseError> {
    let mut top = Cursor::new(buf);
    top.seek(88)?;
    let first_entry_offset = top.u32()? as usize;
    let entry_count = top.u32()?;
    let _initial_cursor = top.u32()?;

    let mut entries = Vec::new();
    let mut paths: std::collections::HashMap<usize, String> = std::collections::HashMap::new();
    let mut pos = first_entry_offset;
    let mut seen = 0u32;

    while seen < entry_count && pos < buf.len() {
        let mut cur = Cursor::new(buf);
        cur.seek(pos)?;
        let entry_start = pos;

        let magic = cur.u32()?;
        if magic != 0xA5A5_A5A5 {
            return Err(ParseError::InvalidHeader("sit5 entry magic"));
        }
        let version = cur.u8()?;
        if version != 1 {
            return Err(ParseError::Unsupported("sit5 entry version"));
        }
        let header1_len = cur.u16()?;
        cur.seek(entry_start + 9)?;
        let flags = cur.u8()?;
        let encrypted = flags & 0b0010_0000 != 0;
        let is_folder = flags & 0b0100_0000 != 0;

        cur.seek(entry_start + 26)?;
        let parent_offset = cur.u32()?;
        cur.seek(entry_start + 30)?;
        let name_len = usize::from(cur.u16()?);
        let header_crc = {
            let mut c2 = Cursor::new(buf);
            c2.seek(entry_start + 32)?;
            c2.u16()?
        };

        let mut crc_input = buf[entry_start..entry_start + usize::from(header1_len)].to_vec();
        crc_input[32] = 0;
        crc_input[33] = 0;
        if crc16_sit(&crc_input) != header_crc {
            return Err(ParseError::CrcMismatch);
        }

        cur.seek(entry_start + 34)?;
        let rsrc_comp_len = cur.u32()?;
        let rsrc_uncomp_len = cur.u32()?;
        let data_comp_len = cur.u32()?;
        let data_uncomp_len = cur.u32()?;
        cur.seek(entry_start + 58)?;
        let data_method = cur.u8()?;
        let rsrc_method = cur.u8()?;
        cur.seek(entry_start + 61)?;
        let password_len = cur.u8()?;
        if encrypted || password_len != 0 {
            return Err(ParseError::Unsupported("sit5 encrypted entry"));
        }

        let name_start = entry_start + usize::from(header1_len);
        let name = String::from_macroman(buf.get(name_start..name_start + name_len).ok_or(ParseError::BadEof)?);

        let parent_path = paths.get(&(parent_offset as usize)).cloned().unwrap_or_default();
        let mut path = parent_path;
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&name);

        let header2_start = name_start + name_len;
        let mut h2 = Cursor::new(buf);
        h2.seek(header2_start)?;
        let h2_flags = h2.u16()?;
        let has_rsrc = h2_flags & 1 != 0;

        let mut file_type = FourCC(0);
        let mut creator = FourCC(0);
        let mut finder_flags = 0u16;
        if !is_folder {
            file_type = FourCC(h2.u32()?);
            creator = FourCC(h2.u32()?);
            finder_flags = h2.u16()?;
        }

        let rsrc_crc = if !is_folder && has_rsrc { h2.u16()? } else { 0 };

        if is_folder {
            paths.insert(entry_start, path);
            pos = header2_start + 2;
            seen += 1;
            continue;
        }

        // Header 2 for a file entry is 2 bytes flags + 4+4+2 type/creator/finder-flags,
        // plus 2 more for the resource CRC when a resource fork is present.
        let header2_len = 2 + 10 + if has_rsrc { 2 } else { 0 };
        let rsrc_offset = header2_start + header2_len;
        let data_offset = rsrc_offset + rsrc_comp_len as usize;

        entries.push(FileEntry {
            path,
            file_type,
            creator,
            finder_flags,
            data_method,
            data_comp_len,
            data_uncomp_len,
            data_crc: 0,
            rsrc_method,
            rsrc_comp_len: if has_rsrc { rsrc_comp_len } else { 0 },
            rsrc_uncomp_len: if has_rsrc { rsrc_uncomp_len } else { 0 },
            rsrc_crc,
            data_offset,
            rsrc_offset,
        });

        pos = data_offset + data_comp_len as usize;
        seen += 1;
    }

    Ok(entries)
}

enum Stage {
    BeforeEntry(usize),
    InData { entry: usize, pos: usize },
    AfterData(usize),
    InRsrc { entry: usize, pos: usize },
    Done,
}

pub struct SitLayer {
    entries: Vec<FileEntry>,
    decoded_data: Vec<Option<Vec<u8>>>,
    decoded_rsrc: Vec<Option<Vec<u8>>>,
    buf: Vec<u8>,
    stage: Stage,
}

impl SitLayer {
    fn ensure_data(&mut self, idx: usize) -> Result<(), ParseError> {
        if self.decoded_data[idx].is_some() {
            return Ok(());
        }
        let e = &self.entries[idx];
        let bytes = self
            .buf
            .get(e.data_offset..e.data_offset + e.data_comp_len as usize)
            .ok_or(ParseError::BadEof)?;
        let decoded = decode_fork(e.data_method, bytes, e.data_uncomp_len)?;
        if (e.data_method & 0x0F) != 15 && crc16_sit(&decoded) != e.data_crc {
            return Err(ParseError::CrcMismatch);
        }
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
            .get(e.rsrc_offset..e.rsrc_offset + e.rsrc_comp_len as usize)
            .ok_or(ParseError::BadEof)?;
        let decoded = decode_fork(e.rsrc_method, bytes, e.rsrc_uncomp_len)?;
        if (e.rsrc_method & 0x0F) != 15 && crc16_sit(&decoded) != e.rsrc_crc {
            return Err(ParseError::CrcMismatch);
        }
        self.decoded_rsrc[idx] = Some(decoded);
        Ok(())
    }
}

impl Layer for SitLayer {
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
                        self.stage = Stage::BeforeEntry(idx + 1);
                    }
                    Stage::InRsrc { entry, .. } => {
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

/// Probe `inner` for a StuffIt classic or SIT5 archive; if found, parse its
/// directory eagerly and wrap it in a [`SitLayer`].
pub fn try_open(mut inner: Box<dyn Layer>) -> Result<super::Probe, ParseError> {
    inner.open(OpenWhich::First)?;
    let peek = super::read_bounded(inner.as_mut(), 96)?;
    inner.open(OpenWhich::First)?;

    let is_classic = looks_like_classic(&peek);
    let is_sit5 = looks_like_sit5(&peek);
    if !is_classic && !is_sit5 {
        return Ok(super::Probe::NoMatch(inner));
    }

    inner.open(OpenWhich::First)?;
    let buf = super::read_all(inner.as_mut())?;

    let entries = if is_classic {
        match parse_classic(&buf) {
            Ok(e) => e,
            Err(_) => {
                inner.open(OpenWhich::First)?;
                return Ok(super::Probe::NoMatch(inner));
            }
        }
    } else {
        match parse_sit5(&buf) {
            Ok(e) => e,
            Err(_) => {
                inner.open(OpenWhich::First)?;
                return Ok(super::Probe::NoMatch(inner));
            }
        }
    };

    let count = entries.len();
    Ok(super::Probe::Matched(Box::new(SitLayer {
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

    fn build_classic_one_file(name: &str, data_method: u8, data_plain: &[u8], encoded: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 22];
        out[0..4].copy_from_slice(b"SIT!");
        out[10..14].copy_from_slice(b"rLau");

        let mut header = vec![0u8; 112];
        header[0] = 0; // rsrc method: none
        header[1] = data_method;
        header[2] = name.len() as u8;
        header[3..3 + name.len()].copy_from_slice(name.as_bytes());
        header[66..70].copy_from_slice(b"TEXT");
        header[70..74].copy_from_slice(b"ttxt");
        header[86..90].copy_from_slice(&(data_plain.len() as u32).to_be_bytes());
        header[94..98].copy_from_slice(&(encoded.len() as u32).to_be_bytes());
        let crc = crc16_sit(data_plain);
        header[100..102].copy_from_slice(&crc.to_be_bytes());
        let header_crc = crc16_sit(&header[..110]);
        header[110..112].copy_from_slice(&header_crc.to_be_bytes());

        out.extend_from_slice(&header);
        out.extend_from_slice(encoded);
        out
    }

    #[test]
    fn try_open_rejects_non_sit_input() {
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(vec![1, 2, 3, 4]));
        assert!(!try_open(layer).unwrap().is_match());
    }

    #[test]
    fn s7_method1_rle90_fork_decodes() {
        let plain = vec![0xFFu8; 10];
        let encoded = [0xFFu8, 0x90, 0x0A];
        let bytes = build_classic_one_file("f", 1, &plain, &encoded);
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(bytes));
        let mut sit = try_open(layer).unwrap().matched().unwrap();

        let info = sit.open(OpenWhich::First).unwrap().unwrap();
        assert_eq!(info.fork_type, ForkType::Data);
        assert_eq!(info.advisory_len, 10);
        let mut buf = vec![0u8; 10];
        assert_eq!(sit.read(&mut buf).unwrap(), 10);
        assert_eq!(buf, plain);
    }

    #[test]
    fn method0_raw_copy_round_trips() {
        let plain = b"hello stuffit".to_vec();
        let bytes = build_classic_one_file("doc", 0, &plain, &plain);
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(bytes));
        let mut sit = try_open(layer).unwrap().matched().unwrap();
        sit.open(OpenWhich::First).unwrap();
        let mut buf = vec![0u8; plain.len()];
        sit.read(&mut buf).unwrap();
        assert_eq!(buf, plain);
    }
}
