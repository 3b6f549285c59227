//! CRC engines used across the container formats.
//!
//! Three distinct checksums are in play, each pinned down in the format
//! specification by polynomial, initial value, reflection, and final XOR:
//!
//! - CRC-16/XMODEM for BinHex headers/forks and the MacBinary header.
//! - A reflected CRC-16 (poly 0x8005, init 0, no final XOR — the
//!   "CRC-16/ARC" parameterization) for all SIT/SIT5 header and fork CRCs.
//! - A reflected CRC-32 (poly 0xEDB88320, init 0xFFFFFFFF) for Compact
//!   Pro, with two different finalizations depending on whether the CRC
//!   covers the directory (no final XOR) or an individual file (final XOR
//!   0xFFFFFFFF — the ordinary CRC-32/ISO-HDLC finalization).
//!
//! All three ride on the `crc` crate's table-driven implementation, so
//! every checksum here is computed via a precomputed 256-entry table
//! rather than a bit-at-a-time loop.

use crc::{Algorithm, Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};

/// CRC-16/XMODEM: polynomial 0x1021, init 0, not reflected, no final XOR.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    Crc::<u16>::new(&CRC_16_XMODEM).checksum(data)
}

const CRC_16_SIT: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x8005,
    init: 0x0000,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0xbb3d,
    residue: 0x0000,
};

/// Reflected CRC-16, polynomial 0x8005, init 0, no final XOR. Used for
/// every SIT/SIT5 header and fork checksum except method 15 (Arsenic)
/// forks, which validate their own CRC internally and skip the
/// container-level check.
pub fn crc16_sit(data: &[u8]) -> u16 {
    Crc::<u16>::new(&CRC_16_SIT).checksum(data)
}

/// Reflected CRC-32 (poly 0xEDB88320, init 0xFFFFFFFF) with the ordinary
/// CRC-32/ISO-HDLC final XOR of 0xFFFFFFFF. Used for Compact Pro per-file
/// CRCs.
pub fn crc32_final_xor(data: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(data)
}

const CRC_32_CPT_DIRECTORY: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c11db7,
    init: 0xffffffff,
    refin: true,
    refout: true,
    xorout: 0x00000000,
    check: 0x2144df1c,
    residue: 0x00000000,
};

/// Reflected CRC-32 (poly 0xEDB88320, init 0xFFFFFFFF) with no final XOR.
/// Used for the Compact Pro archive directory CRC.
pub fn crc32_no_final_xor(data: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_CPT_DIRECTORY).checksum(data)
}
