//! Reading and writing integers and floats at unaligned offsets of message
//! buffers.
//!
//! The byte order is a policy type ([`WireOrder`]). Everything on the wire of
//! the supported devices is little-endian, which is what [`Wire`] uses.
//!
//! None of the accessors fail. Bytes beyond the end of a buffer read as zero
//! and writes beyond the end are discarded, so a malformed message can never
//! cause a panic while it is being decoded.

use std::marker::PhantomData;

/// A byte order used to convert between values and their wire form.
pub trait WireOrder {
    fn decode_u16(raw: [u8; 2]) -> u16;
    fn decode_u32(raw: [u8; 4]) -> u32;
    fn encode_u16(value: u16) -> [u8; 2];
    fn encode_u32(value: u32) -> [u8; 4];
}

/// Little-endian byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LittleEndian;

impl WireOrder for LittleEndian {
    fn decode_u16(raw: [u8; 2]) -> u16 {
        u16::from_le_bytes(raw)
    }

    fn decode_u32(raw: [u8; 4]) -> u32 {
        u32::from_le_bytes(raw)
    }

    fn encode_u16(value: u16) -> [u8; 2] {
        value.to_le_bytes()
    }

    fn encode_u32(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }
}

/// Big-endian byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BigEndian;

impl WireOrder for BigEndian {
    fn decode_u16(raw: [u8; 2]) -> u16 {
        u16::from_be_bytes(raw)
    }

    fn decode_u32(raw: [u8; 4]) -> u32 {
        u32::from_be_bytes(raw)
    }

    fn encode_u16(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    fn encode_u32(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }
}

/// Accessors for values stored in a given byte order.
pub struct Codec<O: WireOrder>(PhantomData<O>);

/// The codec used for all device messages.
pub type Wire = Codec<LittleEndian>;

/// Copies `N` bytes starting at `offset`, padding with zeroes where the buffer
/// ends early.
fn take<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut raw = [0u8; N];
    if let Some(src) = buf.get(offset..) {
        let len = src.len().min(N);
        raw[..len].copy_from_slice(&src[..len]);
    }
    raw
}

/// Copies `raw` to `offset`, dropping the bytes that do not fit.
fn put(buf: &mut [u8], offset: usize, raw: &[u8]) {
    if let Some(dst) = buf.get_mut(offset..) {
        let len = dst.len().min(raw.len());
        dst[..len].copy_from_slice(&raw[..len]);
    }
}

impl<O: WireOrder> Codec<O> {
    pub fn u8(buf: &[u8], offset: usize) -> u8 {
        buf.get(offset).copied().unwrap_or(0)
    }

    pub fn i8(buf: &[u8], offset: usize) -> i8 {
        Self::u8(buf, offset) as i8
    }

    pub fn u16(buf: &[u8], offset: usize) -> u16 {
        O::decode_u16(take(buf, offset))
    }

    pub fn i16(buf: &[u8], offset: usize) -> i16 {
        Self::u16(buf, offset) as i16
    }

    pub fn u32(buf: &[u8], offset: usize) -> u32 {
        O::decode_u32(take(buf, offset))
    }

    pub fn i32(buf: &[u8], offset: usize) -> i32 {
        Self::u32(buf, offset) as i32
    }

    /// Reads an IEEE 754 single precision float.
    pub fn f32(buf: &[u8], offset: usize) -> f32 {
        f32::from_bits(Self::u32(buf, offset))
    }

    pub fn put_u8(buf: &mut [u8], offset: usize, value: u8) {
        put(buf, offset, &[value]);
    }

    pub fn put_i8(buf: &mut [u8], offset: usize, value: i8) {
        Self::put_u8(buf, offset, value as u8);
    }

    pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        put(buf, offset, &O::encode_u16(value));
    }

    pub fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
        Self::put_u16(buf, offset, value as u16);
    }

    pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        put(buf, offset, &O::encode_u32(value));
    }

    pub fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
        Self::put_u32(buf, offset, value as u32);
    }

    pub fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
        Self::put_u32(buf, offset, value.to_bits());
    }
}

/// Sequential reader over a message buffer.
///
/// Used by decoders whose layout is only known while walking the message.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// The offset of the next byte to be read.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether at least `len` more bytes are available.
    pub fn has(&self, len: usize) -> bool {
        self.pos.saturating_add(len) <= self.buf.len()
    }

    pub fn u8(&mut self) -> u8 {
        let value = Wire::u8(self.buf, self.pos);
        self.pos += 1;
        value
    }

    pub fn u16(&mut self) -> u16 {
        let value = Wire::u16(self.buf, self.pos);
        self.pos += 2;
        value
    }

    pub fn u32(&mut self) -> u32 {
        let value = Wire::u32(self.buf, self.pos);
        self.pos += 4;
        value
    }

    pub fn f32(&mut self) -> f32 {
        let value = Wire::f32(self.buf, self.pos);
        self.pos += 4;
        value
    }

    pub fn skip(&mut self, len: usize) {
        self.pos += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_unaligned_little_endian() {
        let buf = [0xAA, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(Wire::u16(&buf, 1), 0x1234);
        assert_eq!(Wire::u32(&buf, 3), 0x1234_5678);
        assert_eq!(Wire::i8(&buf, 0), -86);
        assert_eq!(Wire::i16(&[0xFE, 0xFF], 0), -2);
    }

    #[test]
    fn writes_unaligned_values() {
        let mut buf = [0u8; 9];
        Wire::put_u16(&mut buf, 1, 0xBEEF);
        Wire::put_f32(&mut buf, 3, 1.5);
        Wire::put_i8(&mut buf, 8, -1);

        assert_eq!(&buf[1..3], &[0xEF, 0xBE]);
        assert_eq!(Wire::f32(&buf, 3), 1.5);
        assert_eq!(buf[8], 0xFF);
    }

    #[test]
    fn big_endian_policy() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(Codec::<BigEndian>::u32(&buf, 0), 0x1234_5678);
        assert_eq!(Codec::<BigEndian>::u16(&buf, 2), 0x5678);
    }

    #[test]
    fn out_of_bounds_access_is_harmless() {
        let mut buf = [0x01, 0x02];
        assert_eq!(Wire::u32(&buf, 0), 0x0201);
        assert_eq!(Wire::u32(&buf, 10), 0);

        Wire::put_u32(&mut buf, 1, 0xFFFF_FFFF);
        assert_eq!(buf, [0x01, 0xFF]);
    }

    #[test]
    fn cursor_advances_by_field_size() {
        let buf = [1, 2, 0, 3, 0, 0, 0, 0, 0, 0x80, 0x3F];
        let mut cursor = Cursor::new(&buf, 0);
        assert_eq!(cursor.u8(), 1);
        assert_eq!(cursor.u16(), 2);
        assert_eq!(cursor.u32(), 3);
        assert_eq!(cursor.f32(), 1.0);
        assert_eq!(cursor.position(), 11);
        assert!(!cursor.has(1));
    }
}
