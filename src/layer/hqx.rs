//! HQX layer: BinHex 4.0 armor over RLE90 over a CRC-verified header and
//! pair of forks.

use super::{read_bounded, ForkInfo, ForkType, Layer, OpenWhich, Probe};
use crate::crc::crc16_xmodem;
use crate::error::ParseError;
use crate::macroman::FromMacRoman;
use crate::rle90;
use crate::FourCC;

const SIGNATURE: &[u8] = b"(This file must be converted with BinHex";
const SIGNATURE_SCAN_BOUND: usize = 8192;

/// The 64-symbol BinHex 4.0 armor alphabet, mapping each printable
/// character to a 6-bit value.
const ALPHABET: &[u8; 64] =
    b"!\"#$%&'()*+,-012345689@ABCDEFGHIJKLMNPQRSTUVXYZ[`abcdefhijklmpqr";

fn decode_table() -> [i8; 256] {
    let mut table = [-1i8; 256];
    for (value, &ch) in ALPHABET.iter().enumerate() {
        table[ch as usize] = value as i8;
    }
    table
}

fn six_to_eight(symbols: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(symbols.len() * 3 / 4);
    for chunk in symbols.chunks(4) {
        match chunk {
            [a, b, c, d] => {
                out.push((a << 2) | (b >> 4));
                out.push((b << 4) | (c >> 2));
                out.push((c << 6) | d);
            }
            [a, b, c] => {
                out.push((a << 2) | (b >> 4));
                out.push((b << 4) | (c >> 2));
            }
            [a, b] => {
                out.push((a << 2) | (b >> 4));
            }
            _ => return Err(ParseError::InvalidHeader("hqx truncated armor group")),
        }
    }
    Ok(out)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).ok_or(ParseError::Overflow)?;
        let slice = self.data.get(self.pos..end).ok_or(ParseError::BadEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16be(&mut self) -> Result<u16, ParseError> {
        let s = self.take(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    fn take_u32be(&mut self) -> Result<u32, ParseError> {
        let s = self.take(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }
}

struct Decoded {
    filename: String,
    file_type: FourCC,
    creator: FourCC,
    finder_flags: u16,
    data_fork: Vec<u8>,
    rsrc_fork: Vec<u8>,
}

fn decode_stream(raw: &[u8]) -> Result<Decoded, ParseError> {
    let scan_region = &raw[..raw.len().min(SIGNATURE_SCAN_BOUND)];
    let sig_pos = scan_region
        .windows(SIGNATURE.len())
        .position(|w| w == SIGNATURE)
        .ok_or(ParseError::InvalidHeader("hqx signature not found"))?;

    let colon_pos = raw[sig_pos..]
        .iter()
        .position(|&b| b == b':')
        .map(|p| p + sig_pos)
        .ok_or(ParseError::InvalidHeader("hqx missing armor start"))?;

    let table = decode_table();
    let mut symbols = Vec::new();
    let mut terminated = false;
    for &b in &raw[colon_pos + 1..] {
        match b {
            b':' => {
                terminated = true;
                break;
            }
            b' ' | b'\t' | b'\r' | b'\n' => continue,
            other => {
                let v = table[other as usize];
                if v < 0 {
                    return Err(ParseError::InvalidHeader("hqx invalid armor character"));
                }
                symbols.push(v as u8);
            }
        }
    }
    if !terminated {
        return Err(ParseError::BadEof);
    }

    let compressed = six_to_eight(&symbols)?;
    let decompressed = rle90::decode_all(&compressed)?;

    let mut cursor = Cursor {
        data: &decompressed,
        pos: 0,
    };

    let header_start = cursor.pos;
    let filename_len = usize::from(cursor.take_u8()?);
    if !(1..=63).contains(&filename_len) {
        return Err(ParseError::InvalidHeader("hqx filename length"));
    }
    let filename_bytes = cursor.take(filename_len)?.to_vec();
    let _null = cursor.take_u8()?;
    let file_type = FourCC(cursor.take_u32be()?);
    let creator = FourCC(cursor.take_u32be()?);
    let finder_flags = cursor.take_u16be()?;
    let data_len = usize::try_from(cursor.take_u32be()?)?;
    let rsrc_len = usize::try_from(cursor.take_u32be()?)?;
    let header_end = cursor.pos;
    let stored_header_crc = cursor.take_u16be()?;

    if crc16_xmodem(&decompressed[header_start..header_end]) != stored_header_crc {
        return Err(ParseError::CrcMismatch);
    }

    let data_fork = cursor.take(data_len)?.to_vec();
    let stored_data_crc = cursor.take_u16be()?;
    if crc16_xmodem(&data_fork) != stored_data_crc {
        return Err(ParseError::CrcMismatch);
    }

    let rsrc_fork = cursor.take(rsrc_len)?.to_vec();
    let stored_rsrc_crc = cursor.take_u16be()?;
    if crc16_xmodem(&rsrc_fork) != stored_rsrc_crc {
        return Err(ParseError::CrcMismatch);
    }

    Ok(Decoded {
        filename: String::from_macroman(&filename_bytes),
        file_type,
        creator,
        finder_flags,
        data_fork,
        rsrc_fork,
    })
}

/// BinHex layer, wrapping the armored byte source beneath it.
pub struct HqxLayer {
    inner: Box<dyn Layer>,
    decoded: Option<Decoded>,
    current: Option<usize>,
    next_index: usize,
    read_pos: usize,
}

impl HqxLayer {
    fn ensure_decoded(&mut self) -> Result<(), ParseError> {
        if self.decoded.is_none() {
            self.inner.open(OpenWhich::First)?;
            let raw = super::read_all(self.inner.as_mut())?;
            self.decoded = Some(decode_stream(&raw)?);
        }
        Ok(())
    }

    fn advance(&mut self, start: usize) -> Result<Option<ForkInfo>, ParseError> {
        let decoded = self.decoded.as_ref().expect("decoded by caller");
        let mut idx = start;
        loop {
            match idx {
                0 => {
                    if !decoded.data_fork.is_empty() {
                        self.current = Some(0);
                        self.next_index = 1;
                        self.read_pos = 0;
                        return Ok(Some(ForkInfo {
                            filename: decoded.filename.clone(),
                            file_type: decoded.file_type,
                            creator: decoded.creator,
                            finder_flags: decoded.finder_flags,
                            advisory_len: decoded.data_fork.len() as u64,
                            fork_type: ForkType::Data,
                        }));
                    }
                    idx = 1;
                }
                1 => {
                    if !decoded.rsrc_fork.is_empty() {
                        self.current = Some(1);
                        self.next_index = 2;
                        self.read_pos = 0;
                        return Ok(Some(ForkInfo {
                            filename: decoded.filename.clone(),
                            file_type: decoded.file_type,
                            creator: decoded.creator,
                            finder_flags: decoded.finder_flags,
                            advisory_len: decoded.rsrc_fork.len() as u64,
                            fork_type: ForkType::Resource,
                        }));
                    }
                    idx = 2;
                }
                _ => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }
}

impl Layer for HqxLayer {
    fn open(&mut self, which: OpenWhich) -> Result<Option<ForkInfo>, ParseError> {
        match which {
            OpenWhich::First => {
                self.ensure_decoded()?;
                self.advance(0)
            }
            OpenWhich::Next => {
                if self.decoded.is_none() {
                    return Err(ParseError::Misuse("open(NEXT) before open(FIRST)"));
                }
                self.advance(self.next_index)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        let current = self
            .current
            .ok_or(ParseError::Misuse("read before successful open"))?;
        let decoded = self.decoded.as_ref().expect("decoded by open");
        let source = if current == 0 {
            &decoded.data_fork
        } else {
            &decoded.rsrc_fork
        };
        let remaining = source.len() - self.read_pos;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&source[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }
}

/// Probe `inner` for a BinHex signature; if found, wrap it in an
/// [`HqxLayer`]. Leaves `inner` rewound to its start either way.
pub fn try_open(mut inner: Box<dyn Layer>) -> Result<Probe, ParseError> {
    inner.open(OpenWhich::First)?;
    let peek = read_bounded(inner.as_mut(), SIGNATURE_SCAN_BOUND)?;
    inner.open(OpenWhich::First)?;

    if !peek.windows(SIGNATURE.len()).any(|w| w == SIGNATURE) {
        return Ok(Probe::NoMatch(inner));
    }

    Ok(Probe::Matched(Box::new(HqxLayer {
        inner,
        decoded: None,
        current: None,
        next_index: 0,
        read_pos: 0,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::MemoryLayer;

    fn eight_to_six(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in bytes.chunks(3) {
            match chunk {
                [a, b, c] => {
                    out.push(a >> 2);
                    out.push(((a & 0x3) << 4) | (b >> 4));
                    out.push(((b & 0xF) << 2) | (c >> 6));
                    out.push(c & 0x3F);
                }
                [a, b] => {
                    out.push(a >> 2);
                    out.push(((a & 0x3) << 4) | (b >> 4));
                    out.push((b & 0xF) << 2);
                }
                [a] => {
                    out.push(a >> 2);
                    out.push((a & 0x3) << 4);
                }
                _ => unreachable!(),
            }
        }
        out
    }

    fn armor(bytes: &[u8]) -> Vec<u8> {
        eight_to_six(bytes)
            .into_iter()
            .map(|v| ALPHABET[v as usize])
            .collect()
    }

    fn build_hqx(filename: &[u8], file_type: [u8; 4], creator: [u8; 4], data: &[u8], rsrc: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        header.push(filename.len() as u8);
        header.extend_from_slice(filename);
        header.push(0);
        header.extend_from_slice(&file_type);
        header.extend_from_slice(&creator);
        header.extend_from_slice(&0u16.to_be_bytes());
        header.extend_from_slice(&(data.len() as u32).to_be_bytes());
        header.extend_from_slice(&(rsrc.len() as u32).to_be_bytes());
        header.extend_from_slice(&crc16_xmodem(&header).to_be_bytes());

        let mut blob = header;
        blob.extend_from_slice(data);
        blob.extend_from_slice(&crc16_xmodem(data).to_be_bytes());
        blob.extend_from_slice(rsrc);
        blob.extend_from_slice(&crc16_xmodem(rsrc).to_be_bytes());

        let mut stream = b"(This file must be converted with BinHex 4.0)\r\n:".to_vec();
        stream.extend_from_slice(&armor(&blob));
        stream.push(b':');
        stream
    }

    #[test]
    fn try_open_rejects_non_hqx_input() {
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(b"just some bytes".to_vec()));
        assert!(!try_open(layer).unwrap().is_match());
    }

    #[test]
    fn decodes_header_and_both_forks() {
        let stream = build_hqx(b"T", *b"TEXT", *b"R*ch", b"hello", b"world!");
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(stream));
        let mut hqx = try_open(layer).unwrap().matched().unwrap();

        let data_info = hqx.open(OpenWhich::First).unwrap().unwrap();
        assert_eq!(data_info.fork_type, ForkType::Data);
        assert_eq!(data_info.advisory_len, 5);
        assert_eq!(data_info.filename, "T");
        let mut buf = vec![0u8; 5];
        assert_eq!(hqx.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        let rsrc_info = hqx.open(OpenWhich::Next).unwrap().unwrap();
        assert_eq!(rsrc_info.fork_type, ForkType::Resource);
        let mut buf = vec![0u8; 6];
        assert_eq!(hqx.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"world!");

        assert!(hqx.open(OpenWhich::Next).unwrap().is_none());
    }

    #[test]
    fn s5_zero_length_forks_yield_no_iteration() {
        let stream = build_hqx(b"Z", *b"TEXT", *b"R*ch", b"", b"");
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(stream));
        let mut hqx = try_open(layer).unwrap().matched().unwrap();
        assert!(hqx.open(OpenWhich::First).unwrap().is_none());
    }

    #[test]
    fn corrupt_data_fork_crc_is_detected_on_open() {
        let mut stream = build_hqx(b"T", *b"TEXT", *b"R*ch", b"hello", b"");
        // Flip a byte just after the armor's opening ':' to corrupt the
        // data fork's CRC check without touching the signature text.
        let colon = stream.iter().position(|&b| b == b':').unwrap();
        let idx = colon + 1;
        stream[idx] = if stream[idx] == ALPHABET[0] { ALPHABET[1] } else { ALPHABET[0] };
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(stream));
        let mut hqx = try_open(layer).unwrap().matched().unwrap();
        assert!(hqx.open(OpenWhich::First).is_err());
    }
}
