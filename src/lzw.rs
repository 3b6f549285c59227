//! LZW engine for StuffIt compression method 2.
//!
//! A variable-width (9–14 bit) LZW variant with an explicit Clear code
//! (256) and a StuffIt-specific quirk: a Clear code re-aligns the
//! bitstream to the next 8-symbol boundary before the dictionary resets,
//! so bits already consumed inside the current 8-symbol block are
//! discarded rather than reinterpreted.

use crate::bitreader::LsbBitReader;
use crate::error::ParseError;

const CLEAR_CODE: u32 = 256;
const MAX_ENTRIES: usize = 16384;
const INITIAL_DICT_SIZE: usize = 257;

struct Entry {
    /// Index of the entry this one extends, or `-1` for a root leaf.
    parent: i32,
    /// Length in bytes of this entry's fully expanded string.
    length: u32,
    /// Last byte of this entry's expansion (the one it adds over its parent).
    ch: u8,
    /// First byte of this entry's expansion, cached for O(1) KwKwK lookups.
    root: u8,
}

fn expand(dict: &[Entry], mut code: usize) -> Vec<u8> {
    let len = dict[code].length as usize;
    let mut buf = vec![0u8; len];
    let mut idx = len;
    loop {
        idx -= 1;
        buf[idx] = dict[code].ch;
        let parent = dict[code].parent;
        if parent < 0 {
            break;
        }
        code = parent as usize;
    }
    buf
}

fn width_for_dict_size(dict_size: usize) -> u32 {
    match dict_size {
        n if n > 8192 => 14,
        n if n > 4096 => 13,
        n if n > 2048 => 12,
        n if n > 1024 => 11,
        n if n > 512 => 10,
        _ => 9,
    }
}

/// Decode an LZW stream, producing exactly `expected_len` bytes.
pub fn decode(input: &[u8], expected_len: usize) -> Result<Vec<u8>, ParseError> {
    let mut bits = LsbBitReader::new(input);
    let mut out = Vec::with_capacity(expected_len);

    let mut dict: Vec<Entry> = Vec::with_capacity(MAX_ENTRIES);
    for i in 0..256u32 {
        dict.push(Entry {
            parent: -1,
            length: 1,
            ch: i as u8,
            root: i as u8,
        });
    }
    // Placeholder so indices 0..257 line up with codes 0..257; never read.
    dict.push(Entry {
        parent: -1,
        length: 0,
        ch: 0,
        root: 0,
    });

    let mut dict_size = INITIAL_DICT_SIZE;
    let mut code_width = 9u32;
    let mut last_symbol: Option<u32> = None;
    let mut symbols_consumed: u64 = 0;
    let mut after_clear = true;

    while out.len() < expected_len {
        let sym = bits.read_bits(code_width)?;
        symbols_consumed += 1;

        if sym == CLEAR_CODE {
            let rem = symbols_consumed % 8;
            if rem != 0 {
                let skip = code_width * (8 - rem as u32);
                bits.skip_bits(skip)?;
            }
            dict.truncate(INITIAL_DICT_SIZE);
            dict_size = INITIAL_DICT_SIZE;
            code_width = 9;
            last_symbol = None;
            after_clear = true;
            continue;
        }

        if after_clear {
            if sym >= 256 {
                return Err(ParseError::InvalidSymbol("lzw literal after clear >= 256"));
            }
            out.push(sym as u8);
            last_symbol = Some(sym);
            after_clear = false;
            continue;
        }

        let expansion = if (sym as usize) < dict_size {
            expand(&dict, sym as usize)
        } else if sym as usize == dict_size {
            let prev = last_symbol.ok_or(ParseError::InvalidSymbol("lzw KwKwK with no predecessor"))?;
            let mut e = expand(&dict, prev as usize);
            e.push(dict[prev as usize].root);
            e
        } else {
            return Err(ParseError::InvalidSymbol("lzw code beyond dictionary size"));
        };

        out.extend_from_slice(&expansion);

        if dict_size < MAX_ENTRIES {
            let parent = last_symbol.expect("after_clear handled above");
            dict.push(Entry {
                parent: parent as i32,
                length: dict[parent as usize].length + 1,
                ch: expansion[0],
                root: dict[parent as usize].root,
            });
            dict_size += 1;
            code_width = width_for_dict_size(dict_size);
        }

        last_symbol = Some(sym);
    }

    out.truncate(expected_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lzw::lzw_test_support::encode_for_tests;

    #[test]
    fn round_trips_repetitive_data() {
        let original: Vec<u8> = b"abababababababababab".to_vec();
        let encoded = encode_for_tests(&original);
        let decoded = decode(&encoded, original.len()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trips_longer_varied_data() {
        let mut original = Vec::new();
        for i in 0..2000u32 {
            original.push((i % 251) as u8);
        }
        let encoded = encode_for_tests(&original);
        let decoded = decode(&encoded, original.len()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn manual_clear_code_realigns_to_block_boundary() {
        // Hand-assembled stream: two 9-bit literals, then a Clear at
        // symbol position 3 (not a multiple of 8), which must skip
        // 9 * (8 - 3) bits before the dictionary resets and width drops
        // back to 9, then two more literals at width 9.
        let mut w = ManualBits::new();
        w.push(b'x' as u32, 9);
        w.push(b'y' as u32, 9);
        w.push(CLEAR_CODE, 9);
        w.pad_zero_bits(9 * (8 - 3));
        w.push(b'z' as u32, 9);
        w.push(b'w' as u32, 9);
        let stream = w.finish();

        let decoded = decode(&stream, 4).unwrap();
        assert_eq!(decoded, b"xyzw");
    }

    #[test]
    fn truncated_stream_errors() {
        assert!(decode(&[], 10).is_err());
    }

    pub(super) struct ManualBits {
        bytes: Vec<u8>,
        acc: u32,
        nbits: u32,
    }

    impl ManualBits {
        pub(super) fn new() -> Self {
            ManualBits {
                bytes: Vec::new(),
                acc: 0,
                nbits: 0,
            }
        }

        pub(super) fn push(&mut self, value: u32, width: u32) {
            self.acc |= value << self.nbits;
            self.nbits += width;
            while self.nbits >= 8 {
                self.bytes.push((self.acc & 0xFF) as u8);
                self.acc >>= 8;
                self.nbits -= 8;
            }
        }

        pub(super) fn pad_zero_bits(&mut self, n: u32) {
            self.push(0, n);
        }

        pub(super) fn finish(mut self) -> Vec<u8> {
            if self.nbits > 0 {
                self.bytes.push((self.acc & 0xFF) as u8);
            }
            self.bytes
        }
    }
}

/// A minimal from-scratch LZW encoder used only by this module's own
/// tests, so decoder round-trips can be checked without a fixture file.
/// It is deliberately not exposed outside `#[cfg(test)]`: the crate is
/// decode-only.
#[cfg(test)]
mod lzw_test_support {
    use crate::lzw::{width_for_dict_size, CLEAR_CODE, INITIAL_DICT_SIZE, MAX_ENTRIES};

    struct BitWriter {
        bytes: Vec<u8>,
        acc: u32,
        nbits: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            BitWriter {
                bytes: Vec::new(),
                acc: 0,
                nbits: 0,
            }
        }

        fn push(&mut self, value: u32, width: u32) {
            self.acc |= value << self.nbits;
            self.nbits += width;
            while self.nbits >= 8 {
                self.bytes.push((self.acc & 0xFF) as u8);
                self.acc >>= 8;
                self.nbits -= 8;
            }
        }

        fn skip_to_block_boundary(&mut self, symbols_consumed: u64, width: u32) {
            let rem = symbols_consumed % 8;
            if rem != 0 {
                for _ in 0..(8 - rem) {
                    self.push(0, width);
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            if self.nbits > 0 {
                self.bytes.push((self.acc & 0xFF) as u8);
            }
            self.bytes
        }
    }

    pub(super) fn encode_for_tests(data: &[u8]) -> Vec<u8> {
        use std::collections::HashMap;

        let mut writer = BitWriter::new();
        let mut width = 9u32;
        let mut dict_size = INITIAL_DICT_SIZE;
        let mut table: HashMap<(i32, u8), u32> = HashMap::new();
        let mut symbols_consumed: u64 = 0;

        let mut current: Option<u32> = None; // code representing current string, -1 meaning empty
        for &byte in data {
            match current {
                None => {
                    current = Some(byte as u32);
                }
                Some(cur) => {
                    let key = (cur as i32, byte);
                    if let Some(&next) = table.get(&key) {
                        current = Some(next);
                    } else {
                        writer.push(cur, width);
                        symbols_consumed += 1;
                        if dict_size < MAX_ENTRIES {
                            table.insert(key, dict_size as u32);
                            dict_size += 1;
                            width = width_for_dict_size(dict_size);
                        } else {
                            writer.push(CLEAR_CODE, width);
                            symbols_consumed += 1;
                            writer.skip_to_block_boundary(symbols_consumed, width);
                            table.clear();
                            dict_size = INITIAL_DICT_SIZE;
                            width = 9;
                            symbols_consumed = 0;
                        }
                        current = Some(byte as u32);
                    }
                }
            }
        }
        if let Some(cur) = current {
            writer.push(cur, width);
        }
        writer.finish()
    }
}
