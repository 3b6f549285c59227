//! SIT15 (Arsenic) engine: an adaptive arithmetic coder feeding a
//! zero-run/MTF stage, an inverse Burrows-Wheeler transform, optional
//! derandomization, and a final run-length stage.
//!
//! [`RANDOMIZATION_TABLE`] is the 256-entry schedule consulted when a
//! block's randomized flag is set: 16-bit step values, not reduced modulo
//! 256, whose running sum drives which byte positions get XORed with 1.

use crate::bitreader::MsbBitReader;
use crate::error::ParseError;

const RANGE_ONE: u32 = 1 << 25;
const RANGE_HALF: u32 = 1 << 24;

/// Randomization schedule for derandomizing an Arsenic block (see module
/// docs). `rand_next` is seeded from `table[0]` and advances by
/// `table[rand_idx]` each time a randomized position is hit.
const RANDOMIZATION_TABLE: [u16; 256] = [
    304, 685, 922, 355, 259, 882, 718, 320, 81, 991, 704, 941,
    1290, 825, 174, 149, 323, 935, 449, 9, 260, 1507, 702, 1018,
    1238, 293, 904, 502, 1919, 389, 1562, 1965, 588, 1642, 1033, 1721,
    1474, 863, 1779, 551, 571, 476, 400, 1352, 1489, 1629, 1736, 692,
    1993, 859, 243, 258, 1694, 970, 1449, 1654, 1811, 899, 1314, 1782,
    1850, 1474, 277, 153, 1427, 1518, 1584, 1716, 165, 276, 186, 113,
    922, 1773, 1267, 1578, 1036, 256, 1488, 1224, 1468, 540, 439, 1531,
    1766, 1931, 454, 269, 601, 589, 934, 880, 1165, 1217, 809, 1426,
    1563, 376, 1788, 1693, 1968, 491, 244, 201, 1588, 118, 1678, 949,
    937, 1692, 1950, 1381, 1830, 1652, 879, 1122, 745, 923, 684, 22,
    1560, 1513, 773, 315, 1033, 749, 539, 1213, 967, 656, 1965, 1066,
    647, 210, 536, 1842, 568, 1548, 693, 1261, 515, 909, 1578, 1257,
    920, 429, 201, 1170, 1487, 159, 1099, 911, 7, 1455, 1407, 629,
    383, 1557, 1992, 1183, 3, 203, 1485, 1274, 600, 314, 1684, 1349,
    202, 690, 1991, 1184, 897, 1310, 432, 1843, 675, 1860, 255, 751,
    1713, 201, 1695, 819, 1900, 1887, 1880, 253, 114, 544, 395, 1190,
    963, 932, 930, 1863, 1887, 37, 326, 690, 104, 1473, 1810, 58,
    866, 1479, 759, 867, 312, 1907, 1579, 1828, 1670, 1763, 1778, 1071,
    422, 728, 1493, 765, 1944, 1697, 1552, 1757, 87, 887, 704, 720,
    837, 1737, 126, 567, 1135, 1459, 1739, 200, 1747, 813, 432, 1718,
    335, 935, 63, 1594, 1199, 1607, 2, 861, 1029, 1725, 942, 1228,
    19, 1381, 446, 26,
];

struct FreqModel {
    freq: Vec<u32>,
    total: u32,
    increment: u32,
    limit: u32,
}

impl FreqModel {
    fn new(symbols: usize, increment: u32, limit: u32) -> Self {
        FreqModel {
            freq: vec![1; symbols],
            total: symbols as u32,
            increment,
            limit,
        }
    }

    fn find(&self, threshold: u32) -> Result<(usize, u32, u32, bool), ParseError> {
        let mut cum = 0u32;
        let last = self.freq.len() - 1;
        for (i, &f) in self.freq.iter().enumerate() {
            if cum + f > threshold {
                return Ok((i, cum, f, i == last));
            }
            cum += f;
        }
        Err(ParseError::BadValue)
    }

    fn update(&mut self, sym: usize) {
        self.freq[sym] += self.increment;
        self.total += self.increment;
        if self.total > self.limit {
            let mut new_total = 0u32;
            for f in &mut self.freq {
                *f = (*f + 1) >> 1;
                new_total += *f;
            }
            self.total = new_total;
        }
    }
}

struct ArithmeticDecoder<'a> {
    bits: MsbBitReader<'a>,
    range: u32,
    code: u32,
}

impl<'a> ArithmeticDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<Self, ParseError> {
        let mut bits = MsbBitReader::new(data);
        let code = bits.read_bits(26)?;
        Ok(ArithmeticDecoder {
            bits,
            range: RANGE_ONE,
            code,
        })
    }

    fn decode_symbol(&mut self, model: &mut FreqModel) -> Result<usize, ParseError> {
        let renorm = self.range / model.total;
        if renorm == 0 {
            return Err(ParseError::BadValue);
        }
        let threshold = self.code / renorm;
        let (sym, cum_freq, freq, is_last) = model.find(threshold)?;
        let low = renorm * cum_freq;
        self.code -= low;
        if is_last {
            self.range -= low;
        } else {
            self.range = freq * renorm;
        }
        while self.range <= RANGE_HALF {
            self.range <<= 1;
            self.code = (self.code << 1) | self.bits.read_bit()?;
        }
        model.update(sym);
        Ok(sym)
    }

    fn decode_bit_raw(&mut self, model: &mut FreqModel) -> Result<u32, ParseError> {
        Ok(self.decode_symbol(model)? as u32)
    }

    fn decode_bits_lsb(&mut self, model: &mut FreqModel, n: u32) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for i in 0..n {
            let bit = self.decode_bit_raw(model)?;
            value |= bit << i;
        }
        Ok(value)
    }
}

const MTF_MODEL_SIZES: [usize; 7] = [2, 4, 8, 16, 32, 64, 128];
const MTF_MODEL_INCREMENTS: [u32; 7] = [8, 4, 4, 4, 2, 2, 1];
const MTF_MODEL_BASE: [u32; 7] = [2, 4, 8, 16, 32, 64, 128];

struct FinalRle {
    last: u8,
    consec: u8,
    repeat: u32,
    started: bool,
}

impl FinalRle {
    fn new() -> Self {
        FinalRle {
            last: 0,
            consec: 0,
            repeat: 0,
            started: false,
        }
    }

    /// Feed one post-BWT byte through the final RLE stage, appending
    /// whatever it produces (zero or more bytes) to `out`.
    fn feed(&mut self, b: u8, out: &mut Vec<u8>) {
        if self.repeat > 0 {
            out.push(self.last);
            self.repeat -= 1;
            return;
        }
        if self.started && self.consec == 4 {
            self.consec = 0;
            if b == 0 {
                // The run-length byte itself contributes no output.
                return;
            }
            self.repeat = u32::from(b) - 1;
            out.push(self.last);
            return;
        }
        if self.started && b == self.last {
            self.consec += 1;
        } else {
            self.last = b;
            self.consec = 1;
            self.started = true;
        }
        out.push(b);
    }
}

/// Decode an Arsenic (SIT method 15) stream, producing exactly
/// `expected_len` bytes.
pub fn decode(input: &[u8], expected_len: usize) -> Result<Vec<u8>, ParseError> {
    let mut ac = ArithmeticDecoder::new(input)?;
    let mut primary = FreqModel::new(2, 1, 256);

    let a = ac.decode_bits_lsb(&mut primary, 8)?;
    let s = ac.decode_bits_lsb(&mut primary, 8)?;
    if a != u32::from(b'A') || s != u32::from(b's') {
        return Err(ParseError::InvalidHeader("sit15 stream signature"));
    }
    let b_field = ac.decode_bits_lsb(&mut primary, 4)?;
    let block_size = 1usize << (b_field + 9);
    let mut end_of_stream = ac.decode_bit_raw(&mut primary)? == 1;

    let mut out = Vec::with_capacity(expected_len);
    let mut rle = FinalRle::new();

    while !end_of_stream && out.len() < expected_len {
        let mut selector = FreqModel::new(11, 8, 1024);
        let mut mtf_models: Vec<FreqModel> = MTF_MODEL_SIZES
            .iter()
            .zip(MTF_MODEL_INCREMENTS.iter())
            .map(|(&n, &inc)| FreqModel::new(n, inc, 1024))
            .collect();
        let mut mtf_table: Vec<u8> = (0..=255u8).collect();

        let randomized = ac.decode_bit_raw(&mut primary)? == 1;
        let primary_index = ac.decode_bits_lsb(&mut primary, (b_field + 9) as u32)? as usize;

        let mut block: Vec<u8> = Vec::with_capacity(block_size);

        loop {
            let sym = ac.decode_symbol(&mut selector)?;
            if sym == 10 {
                break;
            }
            if sym == 0 || sym == 1 {
                let mut state: u32 = 1;
                let mut count: u32 = 0;
                let mut s = sym;
                loop {
                    count += (1 + s as u32) * state;
                    state <<= 1;
                    s = ac.decode_symbol(&mut selector)?;
                    if s >= 2 {
                        break;
                    }
                }
                let index = invert_mtf(&mut mtf_table, 0);
                if block.len() + count as usize > block_size {
                    return Err(ParseError::Overflow);
                }
                for _ in 0..count {
                    block.push(index);
                }
                if s == 10 {
                    break;
                }
                push_non_run_symbol(s, &mut mtf_table, &mut mtf_models, &mut ac, &mut block, block_size)?;
            } else {
                push_non_run_symbol(sym, &mut mtf_table, &mut mtf_models, &mut ac, &mut block, block_size)?;
            }
            if block.len() > block_size {
                return Err(ParseError::Overflow);
            }
        }

        let final_end_of_stream = ac.decode_bit_raw(&mut primary)? == 1;
        if final_end_of_stream {
            let _crc = ac.decode_bits_lsb(&mut primary, 32)?;
        }
        end_of_stream = final_end_of_stream;

        decode_block(&block, primary_index, randomized, &mut rle, &mut out, expected_len)?;
    }

    out.truncate(expected_len);
    Ok(out)
}

fn invert_mtf(table: &mut [u8], index: usize) -> u8 {
    let value = table[index];
    table.copy_within(0..index, 1);
    table[0] = value;
    value
}

#[allow(clippy::too_many_arguments)]
fn push_non_run_symbol(
    selector: usize,
    mtf_table: &mut [u8],
    mtf_models: &mut [FreqModel],
    ac: &mut ArithmeticDecoder,
    block: &mut Vec<u8>,
    block_size: usize,
) -> Result<(), ParseError> {
    let index = match selector {
        2 => 1usize,
        3..=9 => {
            let model_idx = selector - 3;
            let within = ac.decode_symbol(&mut mtf_models[model_idx])?;
            MTF_MODEL_BASE[model_idx] as usize + within
        }
        _ => return Err(ParseError::InvalidSymbol("sit15 selector out of range")),
    };
    if index >= mtf_table.len() {
        return Err(ParseError::BadIndex);
    }
    if block.len() >= block_size {
        return Err(ParseError::Overflow);
    }
    let byte = invert_mtf(mtf_table, index);
    block.push(byte);
    Ok(())
}

fn decode_block(
    block: &[u8],
    primary_index: usize,
    randomized: bool,
    rle: &mut FinalRle,
    out: &mut Vec<u8>,
    expected_len: usize,
) -> Result<(), ParseError> {
    let n = block.len();
    if n == 0 {
        return Ok(());
    }
    if primary_index >= n {
        return Err(ParseError::BadIndex);
    }

    let mut counts = [0u32; 256];
    for &b in block {
        counts[b as usize] += 1;
    }
    let mut starts = [0u32; 256];
    let mut acc = 0u32;
    for i in 0..256 {
        starts[i] = acc;
        acc += counts[i];
    }

    let mut transform = vec![0u32; n];
    let mut cursor = starts;
    for (i, &b) in block.iter().enumerate() {
        let slot = &mut cursor[b as usize];
        transform[*slot as usize] = i as u32;
        *slot += 1;
    }

    let mut cur_index = primary_index as u32;
    let mut rand_idx: usize = 0;
    let mut rand_next: u32 = u32::from(RANDOMIZATION_TABLE[0]);

    for pos in 0..n {
        cur_index = transform[cur_index as usize];
        let mut byte = block[cur_index as usize];
        if randomized && pos as u32 == rand_next {
            byte ^= 1;
            rand_idx = (rand_idx + 1) & 255;
            rand_next += u32::from(RANDOMIZATION_TABLE[rand_idx]);
        }
        rle.feed(byte, out);
        if out.len() >= expected_len {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_rle_passes_through_short_runs() {
        let mut rle = FinalRle::new();
        let mut out = Vec::new();
        for b in [1u8, 1, 1] {
            rle.feed(b, &mut out);
        }
        assert_eq!(out, vec![1, 1, 1]);
    }

    #[test]
    fn final_rle_expands_marked_run() {
        // Four consecutive 5's, then a run-length byte of 3 means two more
        // (repeat = 3 - 1 = 2) additional 5's beyond the four already
        // emitted, for six total.
        let mut rle = FinalRle::new();
        let mut out = Vec::new();
        for _ in 0..4 {
            rle.feed(5, &mut out);
        }
        rle.feed(3, &mut out);
        assert_eq!(out, vec![5, 5, 5, 5, 5, 5]);
    }

    #[test]
    fn final_rle_zero_length_byte_emits_nothing_extra() {
        let mut rle = FinalRle::new();
        let mut out = Vec::new();
        for _ in 0..4 {
            rle.feed(7, &mut out);
        }
        rle.feed(0, &mut out);
        assert_eq!(out, vec![7, 7, 7, 7]);
    }

    #[test]
    fn invert_mtf_moves_selected_entry_to_front() {
        let mut table: Vec<u8> = (0..8).collect();
        let value = invert_mtf(&mut table, 3);
        assert_eq!(value, 3);
        assert_eq!(table, vec![3, 0, 1, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn freq_model_rescales_past_limit() {
        let mut model = FreqModel::new(2, 20, 10);
        model.update(0);
        // total (1+1+20=22) exceeded the limit (10), so frequencies were
        // halved via (f+1)>>1: [21,1] -> [11,1], total recomputed to 12.
        assert_eq!(model.freq, vec![11, 1]);
        assert_eq!(model.total, 12);
    }

    #[test]
    fn rejects_bad_signature() {
        // Not a meaningful arithmetic-coded stream, but should fail
        // cleanly rather than panic: too short to even fill the 26-bit
        // code container.
        assert!(decode(&[0x00, 0x01], 4).is_err());
    }
}
