//! Little-endian fixed-width and varint encoding helpers shared by the
//! memtable record format, the block format and the WAL framing.

const B: u32 = 128;

pub struct VarintU32;

impl VarintU32 {
    /// Appends `n` to `dst` as a varint and returns the number of bytes
    /// written.
    pub fn put_varint(dst: &mut Vec<u8>, mut n: u32) -> usize {
        let mut written = 0;
        while n >= B {
            dst.push((n | B) as u8);
            n >>= 7;
            written += 1;
        }
        dst.push(n as u8);
        written + 1
    }

    /// Decodes a varint from the head of `src`. Returns the value and the
    /// number of bytes consumed, or `None` if `src` does not hold a whole
    /// varint (or it overflows 32 bits).
    pub fn read(src: &[u8]) -> Option<(u32, usize)> {
        let mut result: u32 = 0;
        for (i, &byte) in src.iter().enumerate().take(5) {
            if byte < B as u8 {
                result |= (byte as u32) << (i * 7);
                return Some((result, i + 1));
            }
            result |= ((byte & 0x7f) as u32) << (i * 7);
        }
        None
    }

    /// Appends `src` to `dst` prefixed with its varint-encoded length.
    pub fn put_varint_prefixed_slice(dst: &mut Vec<u8>, src: &[u8]) {
        Self::put_varint(dst, src.len() as u32);
        dst.extend_from_slice(src);
    }

    /// Decodes a length-prefixed slice from the head of `src` and advances
    /// `src` past it.
    pub fn get_varint_prefixed_slice<'a>(src: &mut &'a [u8]) -> Option<&'a [u8]> {
        let (len, n) = Self::read(src)?;
        let end = n + len as usize;
        if end > src.len() {
            return None;
        }
        let res = &src[n..end];
        *src = &src[end..];
        Some(res)
    }
}

/// Appends `v` to `dst` as 4 little-endian bytes.
pub fn put_fixed_32(dst: &mut Vec<u8>, v: u32) {
    dst.extend_from_slice(&v.to_le_bytes());
}

/// Appends `v` to `dst` as 8 little-endian bytes.
pub fn put_fixed_64(dst: &mut Vec<u8>, v: u64) {
    dst.extend_from_slice(&v.to_le_bytes());
}

/// Writes `v` into the first 4 bytes of `dst`.
pub fn encode_fixed_32(dst: &mut [u8], v: u32) {
    dst[..4].copy_from_slice(&v.to_le_bytes());
}

/// Decodes the first 4 bytes of `src` as a little-endian u32.
pub fn decode_fixed_32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

/// Decodes the first 8 bytes of `src` as a little-endian u64.
pub fn decode_fixed_64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_u32_round_trip() {
        let mut buf = vec![];
        let mut values = vec![0u32, 1, 127, 128, 255, 16383, 16384];
        for i in 0..32 {
            values.push(1 << i);
            values.push((1 << i) - 1);
        }
        values.push(u32::MAX);
        for &v in &values {
            VarintU32::put_varint(&mut buf, v);
        }
        let mut src = buf.as_slice();
        for &v in &values {
            let (decoded, n) = VarintU32::read(src).unwrap();
            assert_eq!(decoded, v);
            src = &src[n..];
        }
        assert!(src.is_empty());
    }

    #[test]
    fn test_varint_u32_truncated() {
        let mut buf = vec![];
        VarintU32::put_varint(&mut buf, 1 << 28);
        assert!(VarintU32::read(&buf[..buf.len() - 1]).is_none());
    }

    #[test]
    fn test_varint_prefixed_slice() {
        let mut buf = vec![];
        VarintU32::put_varint_prefixed_slice(&mut buf, b"silt");
        VarintU32::put_varint_prefixed_slice(&mut buf, b"");
        VarintU32::put_varint_prefixed_slice(&mut buf, &[7u8; 300]);
        let mut src = buf.as_slice();
        assert_eq!(VarintU32::get_varint_prefixed_slice(&mut src).unwrap(), b"silt");
        assert_eq!(VarintU32::get_varint_prefixed_slice(&mut src).unwrap(), b"");
        assert_eq!(
            VarintU32::get_varint_prefixed_slice(&mut src).unwrap(),
            &[7u8; 300][..]
        );
        assert!(src.is_empty());
        assert!(VarintU32::get_varint_prefixed_slice(&mut src).is_none());
    }

    #[test]
    fn test_fixed_round_trip() {
        let mut buf = vec![];
        put_fixed_32(&mut buf, 0xdead_beef);
        put_fixed_64(&mut buf, 0x0123_4567_89ab_cdef);
        assert_eq!(decode_fixed_32(&buf), 0xdead_beef);
        assert_eq!(decode_fixed_64(&buf[4..]), 0x0123_4567_89ab_cdef);
        let mut head = [0u8; 8];
        encode_fixed_32(&mut head, 42);
        assert_eq!(decode_fixed_32(&head), 42);
    }
}
