//! SIT13 engine: LZSS with a 64 KiB window, two alternating literal/length
//! Huffman trees (the decoder toggles to the "second" tree after every
//! match) plus a distance tree, the code-length tables for which are
//! either built dynamically via a fixed meta-code or drawn from one of
//! five predefined code-sets.

use crate::bitreader::LsbBitReader;
use crate::error::ParseError;
use crate::huffman::CanonicalHuffman;

const WINDOW_SIZE: usize = 65536;
const LITLEN_TABLE_SIZE: usize = 320;
const MAX_CODE_LENGTH: i32 = 18;

/// Canonical code lengths for the 37-symbol meta-code used to transmit a
/// target tree's code lengths in dynamic mode.
const META_CODE_LENGTHS: [u8; 37] = [
    3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6, 6, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 8, 8, 8,
    8, 8, 8, 8, 8,
];

fn decode_tree_lengths(
    bits: &mut LsbBitReader,
    meta_tree: &CanonicalHuffman,
    tree_size: usize,
) -> Result<Vec<u8>, ParseError> {
    let mut lengths = vec![0u8; tree_size];
    let mut pos = 0usize;
    let mut l: i32 = 0;

    while pos < tree_size {
        let m = meta_tree.decode_with(|| bits.read_bit())?;
        let extra: u32 = match m {
            0..=30 => {
                l = m as i32 + 1;
                0
            }
            31 => {
                l = 0;
                0
            }
            32 => {
                l += 1;
                0
            }
            33 => {
                l -= 1;
                0
            }
            34 => u32::from(bits.read_bit()? == 1),
            35 => bits.read_bits(3)? + 2,
            36 => bits.read_bits(6)? + 10,
            _ => return Err(ParseError::InvalidSymbol("sit13 meta-code symbol out of range")),
        };
        if !(0..=MAX_CODE_LENGTH).contains(&l) {
            return Err(ParseError::BadValue);
        }
        let total = extra + 1;
        for _ in 0..total {
            if pos >= tree_size {
                return Err(ParseError::InvalidHeader("sit13 meta-code overruns tree size"));
            }
            lengths[pos] = l as u8;
            pos += 1;
        }
    }

    Ok(lengths)
}

/// Decode a SIT13 stream, producing exactly `expected_len` bytes.
pub fn decode(input: &[u8], expected_len: usize) -> Result<Vec<u8>, ParseError> {
    let mut bits = LsbBitReader::new(input);
    let h = bits.read_bits(8)? as u8;
    let selector = h >> 4;
    let alias = (h >> 3) & 1 == 1;
    let k = usize::from(h & 0x7);

    let (first_lengths, second_lengths, offset_lengths) = match selector {
        0 => {
            let meta_tree = CanonicalHuffman::build(&META_CODE_LENGTHS)?;
            let first = decode_tree_lengths(&mut bits, &meta_tree, LITLEN_TABLE_SIZE)?;
            let second = if alias {
                first.clone()
            } else {
                decode_tree_lengths(&mut bits, &meta_tree, LITLEN_TABLE_SIZE)?
            };
            let offset = decode_tree_lengths(&mut bits, &meta_tree, 10 + k)?;
            (first, second, offset)
        }
        1..=5 => {
            return Err(ParseError::Unsupported(
                "sit13 predefined code-set tables (selectors 1..5)",
            ))
        }
        _ => return Err(ParseError::InvalidHeader("sit13 code-set selector")),
    };

    let first_tree = CanonicalHuffman::build(&first_lengths)?;
    let second_tree = CanonicalHuffman::build(&second_lengths)?;
    let offset_tree = CanonicalHuffman::build(&offset_lengths)?;

    let mut out = Vec::with_capacity(expected_len);
    let mut use_first = true;

    while out.len() < expected_len {
        let tree = if use_first { &first_tree } else { &second_tree };
        let sym = u32::from(tree.decode_with(|| bits.read_bit())?);

        if sym < 256 {
            out.push(sym as u8);
            use_first = true;
            continue;
        }

        let length = match sym {
            256..=317 => (sym - 253) as usize,
            318 => (bits.read_bits(10)? + 65) as usize,
            319 => (bits.read_bits(15)? + 65) as usize,
            _ => return Err(ParseError::InvalidSymbol("sit13 length symbol")),
        };

        let d = u32::from(offset_tree.decode_with(|| bits.read_bit())?);
        let distance = if d == 0 {
            1usize
        } else {
            let extra = bits.read_bits(d - 1)?;
            ((1u32 << (d - 1)) + extra + 1) as usize
        };
        if distance == 0 || distance > WINDOW_SIZE {
            return Err(ParseError::BadValue);
        }
        if distance > out.len() {
            return Err(ParseError::BadOffset);
        }

        let start = out.len() - distance;
        for i in 0..length {
            let byte = out[start + i];
            out.push(byte);
        }
        use_first = false;
    }

    out.truncate(expected_len);
    Ok(out)
}
