// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! Little-endian word codec.
//!
//! Every multi-byte value on the wire is little-endian; the flip to and from
//! host order happens here and nowhere else. Callers are responsible for
//! bounds-checking offsets before loading or storing.

pub(crate) fn load16(buf: &[u8], off: usize) -> u16 {
    let mut w = [0u8; 2];
    w.copy_from_slice(&buf[off..off + 2]);
    u16::from_le_bytes(w)
}

pub(crate) fn load32(buf: &[u8], off: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(w)
}

pub(crate) fn load64(buf: &[u8], off: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(w)
}

pub(crate) fn store16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn store32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn store64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian_on_the_wire() {
        let mut buf = [0u8; 16];
        store64(&mut buf, 0, 0x1122_3344_5566_7788);
        assert_eq!(buf[..8], [0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
        store32(&mut buf, 8, 0xdead_beef);
        assert_eq!(buf[8..12], [0xef, 0xbe, 0xad, 0xde]);
        store16(&mut buf, 12, 0x0102);
        assert_eq!(buf[12..14], [0x02, 0x01]);
    }

    #[test]
    fn load_round_trips_store() {
        let mut buf = [0u8; 8];
        store64(&mut buf, 0, u64::MAX - 3);
        assert_eq!(load64(&buf, 0), u64::MAX - 3);
        store32(&mut buf, 2, 77);
        assert_eq!(load32(&buf, 2), 77);
        store16(&mut buf, 1, 0xfffe);
        assert_eq!(load16(&buf, 1), 0xfffe);
    }
}
