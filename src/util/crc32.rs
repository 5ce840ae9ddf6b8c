//! CRC32 helpers for on-disk framing. Stored checksums are "masked" by
//! rotating and adding a constant, so that computing the CRC of a string
//! that already embeds CRCs does not degenerate.

const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC of `data`.
pub fn hash(data: &[u8]) -> u32 {
    extend(0, data)
}

/// Extends `base` (the CRC of some string A) with `data`, yielding the CRC
/// of A concatenated with `data`.
pub fn extend(base: u32, data: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new_with_initial(base);
    h.update(data);
    h.finalize()
}

/// Masks `crc` for storage.
pub fn mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Inverse of `mask`.
pub fn unmask(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}
