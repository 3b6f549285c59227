//! Pipeline driver: repeatedly probes a fixed list of layer factories
//! against the current tail, wrapping it whenever one matches, until none
//! do.
//!
//! Order matters: SIT and CPT buffer their entire underlying fork up
//! front, whereas HQX and BIN only commit to a full decode once they've
//! been constructed (see each layer's own `try_open`), so the cheaper
//! checks run first.

use crate::error::ParseError;
use crate::layer::{bin, cpt, hqx, sit, Layer, Probe};

type Factory = fn(Box<dyn Layer>) -> Result<Probe, ParseError>;

const FACTORIES: [Factory; 4] = [sit::try_open, hqx::try_open, bin::try_open, cpt::try_open];

/// Run the probe/wrap/restart sweep over `layer`, returning the final,
/// fully-unwrapped tail.
///
/// Each factory that doesn't match hands the (rewound) layer straight
/// back, so a non-match never loses the in-flight layer; once a factory
/// matches, the sweep restarts from the top of the list skipping that
/// factory, so the newly produced layer isn't immediately re-probed by
/// the detector that just produced it.
pub fn run_pipeline(mut layer: Box<dyn Layer>) -> Result<Box<dyn Layer>, ParseError> {
    let mut skip: Option<usize> = None;

    'sweep: loop {
        for (idx, factory) in FACTORIES.iter().enumerate() {
            if Some(idx) == skip {
                continue;
            }
            match factory(layer)? {
                Probe::Matched(next) => {
                    layer = next;
                    skip = Some(idx);
                    continue 'sweep;
                }
                Probe::NoMatch(same) => {
                    layer = same;
                }
            }
        }
        return Ok(layer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::MemoryLayer;
    use crate::layer::{ForkType, OpenWhich};

    #[test]
    fn plain_bytes_pass_through_untouched() {
        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(b"not a recognized format".to_vec()));
        let mut tail = run_pipeline(layer).unwrap();
        let info = tail.open(OpenWhich::First).unwrap().unwrap();
        assert_eq!(info.advisory_len, 24);
    }

    #[test]
    fn s7_hqx_wrapped_sit_with_rle90_fork() {
        use crate::crc::{crc16_sit, crc16_xmodem};

        let plain = vec![0xFFu8; 10];
        let encoded_fork = [0xFFu8, 0x90, 0x0A];

        let mut sit_bytes = vec![0u8; 22];
        sit_bytes[0..4].copy_from_slice(b"SIT!");
        sit_bytes[10..14].copy_from_slice(b"rLau");
        let mut header = vec![0u8; 112];
        header[0] = 0;
        header[1] = 1; // RLE90
        header[2] = 1;
        header[3] = b'f';
        header[66..70].copy_from_slice(b"TEXT");
        header[70..74].copy_from_slice(b"ttxt");
        header[86..90].copy_from_slice(&(plain.len() as u32).to_be_bytes());
        header[94..98].copy_from_slice(&(encoded_fork.len() as u32).to_be_bytes());
        let crc = crc16_sit(&plain);
        header[100..102].copy_from_slice(&crc.to_be_bytes());
        let header_crc = crc16_sit(&header[..110]);
        header[110..112].copy_from_slice(&header_crc.to_be_bytes());
        sit_bytes.extend_from_slice(&header);
        sit_bytes.extend_from_slice(&encoded_fork);

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
        const ALPHABET: &[u8; 64] =
            b"!\"#$%&'()*+,-012345689@ABCDEFGHIJKLMNPQRSTUVXYZ[`abcdefhijklmpqr";
        fn armor(bytes: &[u8]) -> Vec<u8> {
            eight_to_six(bytes).into_iter().map(|v| ALPHABET[v as usize]).collect()
        }

        let mut hqx_header = Vec::new();
        hqx_header.push(1u8);
        hqx_header.push(b's');
        hqx_header.push(0);
        hqx_header.extend_from_slice(b"\0\0\0\0");
        hqx_header.extend_from_slice(b"\0\0\0\0");
        hqx_header.extend_from_slice(&0u16.to_be_bytes());
        hqx_header.extend_from_slice(&(sit_bytes.len() as u32).to_be_bytes());
        hqx_header.extend_from_slice(&0u32.to_be_bytes());
        hqx_header.extend_from_slice(&crc16_xmodem(&hqx_header).to_be_bytes());

        let mut blob = hqx_header;
        blob.extend_from_slice(&sit_bytes);
        blob.extend_from_slice(&crc16_xmodem(&sit_bytes).to_be_bytes());
        blob.extend_from_slice(&crc16_xmodem(&[]).to_be_bytes());

        let mut stream = b"(This file must be converted with BinHex 4.0)\r\n:".to_vec();
        stream.extend_from_slice(&armor(&blob));
        stream.push(b':');

        let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(stream));
        let mut tail = run_pipeline(layer).unwrap();

        let info = tail.open(OpenWhich::First).unwrap().unwrap();
        assert_eq!(info.fork_type, ForkType::Data);
        assert_eq!(info.advisory_len, 10);
        let mut buf = vec![0u8; 10];
        assert_eq!(tail.read(&mut buf).unwrap(), 10);
        assert_eq!(buf, plain);
    }
}
