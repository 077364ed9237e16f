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

//! Primitive accessors.
//!
//! List accessors guard on the element width before touching memory, so a
//! handle decoded from untrusted bytes can never be read at the wrong
//! stride. Struct field reads beyond the data section yield zero, which is
//! what lets old readers accept structs written by newer schemas.

use crate::layout::{Ptr, PtrKind};
use crate::message::Message;
use crate::segment::SegmentAllocator;
use crate::wire;
use crate::{Error, ErrorKind, Result};

macro_rules! list_accessors {
    ($get:ident, $set:ident, $ty:ty, $width:expr, $load:expr, $store:expr) => {
        /// Reads element `index` of a primitive list of this width.
        pub fn $get(&self, list: Ptr, index: u32) -> Result<$ty> {
            let off = self.elem_off(&list, index, $width)?;
            let bytes = self
                .core
                .slice(list.seg, off, $width)
                .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
            Ok($load(bytes))
        }

        /// Writes element `index` of a primitive list of this width.
        pub fn $set(&mut self, list: Ptr, index: u32, value: $ty) -> Result<()> {
            let off = self.elem_off(&list, index, $width)?;
            let bytes = self
                .core
                .slice_mut(list.seg, off, $width)
                .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
            $store(bytes, value);
            Ok(())
        }
    };
}

macro_rules! struct_accessors {
    ($read:ident, $write:ident, $ty:ty, $width:expr, $load:expr, $store:expr) => {
        /// Reads the primitive field at byte offset `off` of a struct's data
        /// section. Fields beyond the data section read as zero.
        pub fn $read(&self, p: Ptr, off: u32) -> $ty {
            if p.kind != PtrKind::Struct || off as u64 + $width > p.datasz as u64 {
                return 0;
            }
            match self.core.slice(p.seg, p.off + off, $width as u32) {
                Some(bytes) => $load(bytes),
                None => 0,
            }
        }

        /// Writes the primitive field at byte offset `off` of a struct's
        /// data section.
        pub fn $write(&mut self, p: Ptr, off: u32, value: $ty) -> Result<()> {
            if p.kind != PtrKind::Struct {
                return Err(Error::from_kind(ErrorKind::NotAStruct));
            }
            if off as u64 + $width > p.datasz as u64 {
                return Err(Error::from_kind(ErrorKind::IndexOutOfBounds));
            }
            let bytes = self
                .core
                .slice_mut(p.seg, p.off + off, $width as u32)
                .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
            $store(bytes, value);
            Ok(())
        }
    };
}

impl<A> Message<A>
where
    A: SegmentAllocator,
{
    fn elem_off(&self, list: &Ptr, index: u32, width: u32) -> Result<u32> {
        if list.kind != PtrKind::List || list.datasz != width {
            return Err(Error::from_kind(ErrorKind::ElementSizeMismatch));
        }
        if index >= list.size {
            return Err(Error::from_kind(ErrorKind::IndexOutOfBounds));
        }
        Ok(list.off + index * width)
    }

    list_accessors!(get8, set8, u8, 1, |b: &[u8]| b[0], |b: &mut [u8], v| b[0] = v);
    list_accessors!(get16, set16, u16, 2, |b: &[u8]| wire::load16(b, 0), |b: &mut [u8], v| {
        wire::store16(b, 0, v)
    });
    list_accessors!(get32, set32, u32, 4, |b: &[u8]| wire::load32(b, 0), |b: &mut [u8], v| {
        wire::store32(b, 0, v)
    });
    list_accessors!(get64, set64, u64, 8, |b: &[u8]| wire::load64(b, 0), |b: &mut [u8], v| {
        wire::store64(b, 0, v)
    });

    struct_accessors!(read8, write8, u8, 1, |b: &[u8]| b[0], |b: &mut [u8], v| b[0] = v);
    struct_accessors!(read16, write16, u16, 2, |b: &[u8]| wire::load16(b, 0), |b: &mut [u8], v| {
        wire::store16(b, 0, v)
    });
    struct_accessors!(read32, write32, u32, 4, |b: &[u8]| wire::load32(b, 0), |b: &mut [u8], v| {
        wire::store32(b, 0, v)
    });
    struct_accessors!(read64, write64, u64, 8, |b: &[u8]| wire::load64(b, 0), |b: &mut [u8], v| {
        wire::store64(b, 0, v)
    });

    /// Reads bit `index` of a bit list.
    pub fn get1(&self, list: Ptr, index: u32) -> Result<bool> {
        if list.kind != PtrKind::BitList {
            return Err(Error::from_kind(ErrorKind::ElementSizeMismatch));
        }
        if index >= list.size {
            return Err(Error::from_kind(ErrorKind::IndexOutOfBounds));
        }
        let byte = self
            .core
            .slice(list.seg, list.off + index / 8, 1)
            .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?[0];
        Ok(byte & (1 << (index % 8)) != 0)
    }

    /// Writes bit `index` of a bit list.
    pub fn set1(&mut self, list: Ptr, index: u32, value: bool) -> Result<()> {
        if list.kind != PtrKind::BitList {
            return Err(Error::from_kind(ErrorKind::ElementSizeMismatch));
        }
        if index >= list.size {
            return Err(Error::from_kind(ErrorKind::IndexOutOfBounds));
        }
        let byte = &mut self
            .core
            .slice_mut(list.seg, list.off + index / 8, 1)
            .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?[0];
        if value {
            *byte |= 1 << (index % 8);
        } else {
            *byte &= !(1 << (index % 8));
        }
        Ok(())
    }

    /// Block-reads up to `bits` bits starting at bit `off` into `dst`.
    ///
    /// `off` must be a byte multiple. Requests running past the end of the
    /// list clamp to it, and the bit count actually transferred is returned;
    /// a trailing partial byte is copied whole.
    pub fn read1(&self, list: Ptr, off: u32, dst: &mut [u8], bits: u32) -> Result<u32> {
        let (src_off, n, nb) = self.bit_block(&list, off, bits)?;
        if n == 0 {
            return Ok(0);
        }
        let src = self
            .core
            .slice(list.seg, src_off, nb)
            .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
        let dst = dst
            .get_mut(..nb as usize)
            .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
        dst.copy_from_slice(src);
        Ok(n)
    }

    /// Block-writes up to `bits` bits starting at bit `off` from `src`.
    ///
    /// The same alignment and clamping rules as [`Message::read1`] apply; a
    /// clamped write still stores the trailing partial byte whole.
    pub fn write1(&mut self, list: Ptr, off: u32, src: &[u8], bits: u32) -> Result<u32> {
        let (dst_off, n, nb) = self.bit_block(&list, off, bits)?;
        if n == 0 {
            return Ok(0);
        }
        let src = src
            .get(..nb as usize)
            .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
        let dst = self
            .core
            .slice_mut(list.seg, dst_off, nb)
            .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
        dst.copy_from_slice(src);
        Ok(n)
    }

    fn bit_block(&self, list: &Ptr, off: u32, bits: u32) -> Result<(u32, u32, u32)> {
        if list.kind != PtrKind::BitList {
            return Err(Error::from_kind(ErrorKind::ElementSizeMismatch));
        }
        if off % 8 != 0 {
            return Err(Error::from_kind(ErrorKind::UnalignedBitOffset));
        }
        if off >= list.size {
            return Ok((0, 0, 0));
        }
        let n = core::cmp::min(bits, list.size - off);
        Ok((list.off + off / 8, n, (n + 7) / 8))
    }
}
