//! BIN layer: MacBinary's 128-byte header followed by a data fork and a
//! resource fork, each padded to the next 128-byte boundary.
//!
//! Detection and field layout follow a single combined validity check (no
//! MacBinary I/II/III version distinction is needed — a file that isn't
//! at least MacBinary-II-shaped, like a plain MacBinary I record, simply
//! doesn't match).

use super::{ForkInfo, ForkType, Layer, OpenWhich};
use crate::crc::crc16_xmodem;
use crate::error::ParseError;
use crate::macroman::FromMacRoman;
use crate::FourCC;

const HEADER_LEN: usize = 128;
const MAX_FORK_LEN: u32 = 0x7FFF_FFFF;

fn next_multiple_of_128(value: u32) -> Result<u32, ParseError> {
    let rem = value % 128;
    if rem == 0 {
        Ok(value)
    } else {
        value.checked_add(128 - rem).ok_or(ParseError::Overflow)
    }
}

fn looks_like_bin(header: &[u8; HEADER_LEN]) -> bool {
    let filename_len = header[1];
    if header[0] != 0 || header[74] != 0 || !(1..=63).contains(&filename_len) {
        return false;
    }
    let stored_crc = u16::from_be_bytes([header[124], header[125]]);
    let crc_matches = crc16_xmodem(&header[..124]) == stored_crc;
    crc_matches || header[82] == 0
}

#[derive(Clone)]
struct Parsed {
    filename: String,
    file_type: FourCC,
    creator: FourCC,
    finder_flags: u16,
    data_len: u32,
    rsrc_len: u32,
    secondary_header_len: u16,
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<Parsed, ParseError> {
    let filename_len = usize::from(header[1]);
    let filename = String::from_macroman(&header[2..2 + filename_len]);
    let file_type = FourCC(u32::from_be_bytes(header[65..69].try_into().unwrap()));
    let creator = FourCC(u32::from_be_bytes(header[69..73].try_into().unwrap()));
    let finder_flags = (u16::from(header[73]) << 8 | u16::from(header[101])) & !0b0000_0110_0000_0011;
    let data_len = u32::from_be_bytes(header[83..87].try_into().unwrap());
    let rsrc_len = u32::from_be_bytes(header[87..91].try_into().unwrap());
    if data_len > MAX_FORK_LEN || rsrc_len > MAX_FORK_LEN {
        return Err(ParseError::BadValue);
    }
    let secondary_header_len = u16::from_be_bytes(header[120..122].try_into().unwrap());

    Ok(Parsed {
        filename,
        file_type,
        creator,
        finder_flags,
        data_len,
        rsrc_len,
        secondary_header_len,
    })
}

enum Stage {
    BeforeData,
    InData { remaining: u32 },
    AfterData,
    InRsrc { remaining: u32 },
    Done,
}

/// MacBinary layer, streaming the data and resource forks directly from
/// the underlying byte source without buffering them.
pub struct BinLayer {
    inner: Box<dyn Layer>,
    header: Option<Parsed>,
    stage: Stage,
}

impl BinLayer {
    fn skip(&mut self, mut n: u32) -> Result<(), ParseError> {
        let mut buf = [0u8; 4096];
        while n > 0 {
            let want = (n as usize).min(buf.len());
            let got = self.inner.read(&mut buf[..want])?;
            if got == 0 {
                return Err(ParseError::BadEof);
            }
            n -= got as u32;
        }
        Ok(())
    }
}

impl Layer for BinLayer {
    fn open(&mut self, which: OpenWhich) -> Result<Option<ForkInfo>, ParseError> {
        match which {
            OpenWhich::First => {
                self.inner.open(OpenWhich::First)?;
                let mut raw = [0u8; HEADER_LEN];
                let mut got = 0;
                while got < HEADER_LEN {
                    let n = self.inner.read(&mut raw[got..])?;
                    if n == 0 {
                        return Err(ParseError::BadEof);
                    }
                    got += n;
                }
                if !looks_like_bin(&raw) {
                    return Err(ParseError::InvalidHeader("macbinary header"));
                }
                let parsed = parse_header(&raw)?;

                let padded_secondary = next_multiple_of_128(u32::from(parsed.secondary_header_len))?;
                self.skip(padded_secondary)?;

                self.header = Some(parsed);
                self.stage = Stage::BeforeData;
                self.open(OpenWhich::Next)
            }
            OpenWhich::Next => {
                let header = self
                    .header
                    .as_ref()
                    .ok_or(ParseError::Misuse("open(NEXT) before open(FIRST)"))?
                    .clone();
                loop {
                    match self.stage {
                        Stage::BeforeData => {
                            let len = header.data_len;
                            self.stage = Stage::InData { remaining: len };
                            if len > 0 {
                                return Ok(Some(ForkInfo {
                                    filename: header.filename.clone(),
                                    file_type: header.file_type,
                                    creator: header.creator,
                                    finder_flags: header.finder_flags,
                                    advisory_len: u64::from(len),
                                    fork_type: ForkType::Data,
                                }));
                            }
                        }
                        Stage::InData { remaining } => {
                            self.skip(remaining)?;
                            let padded = next_multiple_of_128(header.data_len)?;
                            self.skip(padded - header.data_len)?;
                            self.stage = Stage::AfterData;
                        }
                        Stage::AfterData => {
                            let len = header.rsrc_len;
                            self.stage = Stage::InRsrc { remaining: len };
                            if len > 0 {
                                return Ok(Some(ForkInfo {
                                    filename: header.filename.clone(),
                                    file_type: header.file_type,
                                    creator: header.creator,
                                    finder_flags: header.finder_flags,
                                    advisory_len: u64::from(len),
                                    fork_type: ForkType::Resource,
                                }));
                            }
                        }
                        Stage::InRsrc { remaining } => {
                            self.skip(remaining)?;
                            self.stage = Stage::Done;
                        }
                        Stage::Done => return Ok(None),
                    }
                }
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        let remaining = match &mut self.stage {
            Stage::InData { remaining } | Stage::InRsrc { remaining } => remaining,
            _ => return Err(ParseError::Misuse("read before successful open")),
        };
        let want = (buf.len() as u64).min(u64::from(*remaining)) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        *remaining -= n as u32;
        Ok(n)
    }
}

/// Probe `inner` for a MacBinary header; if found, wrap it in a
/// [`BinLayer`]. Leaves `inner` rewound to its start either way.
pub fn try_open(mut inner: Box<dyn Layer>) -> Result<super::Probe, ParseError> {
    inner.open(OpenWhich::First)?;
    let peek = super::read_bounded(inner.as_mut(), HEADER_LEN)?;
    inner.open(OpenWhich::First)?;

    if peek.len() < HEADER_LEN {
        return Ok(super::Probe::NoMatch(inner));
    }
    let header: [u8; HEADER_LEN] = peek[..HEADER_LEN].try_into().unwrap();
    if !looks_like_bin(&header) {
        return Ok(super::Probe::NoMatch(inner));
    }

    Ok(super::Probe::Matched(Box::new(BinLayer {
        inner,
        header: None,
        stage: Stage::BeforeData,
    })))
}
