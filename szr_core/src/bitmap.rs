//! MSB-first bit packing: the indicator bitmap and the bit streams the
//! Huffman coder writes.

use crate::error::{Result, SzError};

/// Appends bits to a byte vector, most significant bit first.
pub struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u128,
    fill: u32,
    start: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        let start = out.len();
        Self {
            out,
            acc: 0,
            fill: 0,
            start,
        }
    }

    /// Write the low `len` bits of `code`, `len <= 64`.
    #[inline]
    pub fn write(&mut self, code: u64, len: u32) {
        debug_assert!(len <= 64);
        self.acc = (self.acc << len) | code as u128;
        self.fill += len;
        while self.fill >= 8 {
            self.fill -= 8;
            self.out.push((self.acc >> self.fill) as u8);
        }
        self.acc &= (1u128 << self.fill) - 1;
    }

    /// Zero-pad to a byte boundary. Returns the number of bytes written
    /// since construction.
    pub fn finish(mut self) -> usize {
        if self.fill > 0 {
            let pad = 8 - self.fill;
            self.write(0, pad);
        }
        self.out.len() - self.start
    }
}

/// Reads bits from a byte slice, most significant bit first.
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self.bytes.get(self.pos / 8).ok_or_else(|| {
            SzError::Huffman(format!("bit stream exhausted after {} bits", self.pos))
        })?;
        let bit = (byte >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    /// Bytes touched so far, counting a partially read byte.
    pub fn bytes_consumed(&self) -> usize {
        self.pos.div_ceil(8)
    }
}

/// Byte length of a bitmap holding `bits` flags.
#[inline]
pub fn packed_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Pack flags eight to a byte, first flag in the high bit.
pub fn pack(flags: &[bool], out: &mut Vec<u8>) {
    for chunk in flags.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |b, (i, &f)| b | ((f as u8) << (7 - i)));
        out.push(byte);
    }
}

/// Inverse of [`pack`]. Padding bits of the last byte are ignored.
pub fn unpack(bytes: &[u8], count: usize) -> Result<Vec<bool>> {
    if bytes.len() < packed_len(count) {
        return Err(SzError::Internal(format!(
            "bitmap of {count} flags needs {} bytes, got {}",
            packed_len(count),
            bytes.len()
        )));
    }
    let mut flags = crate::error::try_with_capacity(count)?;
    flags.extend((0..count).map(|i| (bytes[i / 8] >> (7 - i % 8)) & 1 == 1));
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        let mut out = Vec::new();
        pack(&[true, false, false, false, false, false, false, true, true], &mut out);
        assert_eq!(out, vec![0b1000_0001, 0b1000_0000]);
        assert_eq!(
            unpack(&out, 9).unwrap(),
            vec![true, false, false, false, false, false, false, true, true]
        );
    }

    #[test]
    fn test_unpack_short_input() {
        assert!(unpack(&[0xff], 9).is_err());
    }

    #[test]
    fn test_bit_writer_spans_bytes() {
        let mut out = vec![0xaa];
        let mut w = BitWriter::new(&mut out);
        w.write(0b101, 3);
        w.write(0x1ff, 9);
        w.write(u64::MAX, 64);
        assert_eq!(w.finish(), 10);
        assert_eq!(out[1], 0b1011_1111);
        assert_eq!(out[2], 0b1111_1111);

        let mut r = BitReader::new(&out[1..]);
        assert!(r.read_bit().unwrap());
        assert!(!r.read_bit().unwrap());
        assert_eq!(r.bytes_consumed(), 1);
    }

    #[test]
    fn test_reader_exhaustion() {
        let mut r = BitReader::new(&[0x80]);
        for _ in 0..8 {
            r.read_bit().unwrap();
        }
        assert!(r.read_bit().is_err());
    }
}
