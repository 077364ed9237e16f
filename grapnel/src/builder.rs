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

//! Object construction.
//!
//! Builders bump-allocate in the requested segment when it has room and fall
//! back to the shared allocation path otherwise. On a segment switch an
//! 8-byte scratch tag is written ahead of the object so a later cross-segment
//! pointer install can far-point at the tag instead of allocating a landing
//! pad.

use crate::layout::{self, Ptr, PtrKind, STRUCT_PTR};
use crate::message::{Message, SegmentRef};
use crate::segment::SegmentAllocator;
use crate::{Error, ErrorKind, Result};

/// Largest element count the 29-bit wire field can carry.
const MAX_LIST_LEN: u32 = (1 << 29) - 1;

fn checked_total(total: u64) -> Result<u32> {
    if total > (u32::MAX - 16) as u64 {
        Err(Error::from_kind(ErrorKind::AllocationTooLarge))
    } else {
        Ok(total as u32)
    }
}

impl<A> Message<A>
where
    A: SegmentAllocator,
{
    /// Places `bytes` of storage behind `p`, preferring the segment already
    /// named in the handle. All allocations round up to 8-byte alignment.
    fn new_object(&mut self, p: &mut Ptr, bytes: u32) -> Result<()> {
        let bytes = (bytes + 7) & !7;

        let rec = &self.core.recs[p.seg as usize];
        if rec.len as u64 + bytes as u64 <= rec.cap() as u64 {
            p.off = rec.len;
            self.core.recs[p.seg as usize].len += bytes;
            return Ok(());
        }

        let (slot, off) = self.alloc(bytes + 8)?;
        p.seg = slot;
        p.off = off;
        let tag = layout::ptr_value(p, 0);
        self.core.store64(slot, off, tag);
        p.off += 8;
        p.has_ptr_tag = true;
        Ok(())
    }

    /// Allocates a struct with `datasz` bytes of primitive data (rounded up
    /// to a whole number of words) and `ptrs` pointer slots.
    pub fn new_struct(&mut self, seg: SegmentRef, datasz: u32, ptrs: u16) -> Result<Ptr> {
        if datasz > (u16::MAX as u32) * 8 {
            return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
        }
        let mut p = Ptr::null();
        p.kind = PtrKind::Struct;
        p.seg = seg.0;
        p.datasz = (datasz + 7) & !7;
        p.ptrsz = ptrs as u32 * 8;
        let total = p.datasz + p.ptrsz;
        self.new_object(&mut p, total)?;
        Ok(p)
    }

    /// Allocates a list of `size` elements shaped by `datasz` bytes of data
    /// and `ptrs` pointer slots each.
    ///
    /// Pure data lists up to 8 bytes wide use the matching primitive element
    /// kind (widths round up to 1, 2, 4, or 8). Anything wider, or any list
    /// with pointer slots, becomes a composite list with an extra tag word
    /// ahead of the body.
    pub fn new_list(&mut self, seg: SegmentRef, size: u32, datasz: u32, ptrs: u16) -> Result<Ptr> {
        if size > MAX_LIST_LEN {
            return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
        }
        let mut p = Ptr::null();
        p.kind = PtrKind::List;
        p.seg = seg.0;
        p.size = size;

        if ptrs > 0 || datasz > 8 {
            if datasz > (u16::MAX as u32) * 8 {
                return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
            }
            p.datasz = (datasz + 7) & !7;
            p.ptrsz = ptrs as u32 * 8;
            p.has_composite_tag = true;
            let body = size as u64 * (p.datasz + p.ptrsz) as u64;
            if body / 8 > MAX_LIST_LEN as u64 {
                return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
            }
            self.new_object(&mut p, checked_total(body + 8)?)?;
            let tag = STRUCT_PTR
                | ((size as u64) << 2)
                | (((p.datasz / 8) as u64) << 32)
                | ((ptrs as u64) << 48);
            self.core.store64(p.seg, p.off, tag);
            p.off += 8;
        } else if datasz > 4 {
            p.datasz = 8;
            self.new_object(&mut p, checked_total(size as u64 * 8)?)?;
        } else if datasz > 2 {
            p.datasz = 4;
            self.new_object(&mut p, checked_total(size as u64 * 4)?)?;
        } else {
            p.datasz = datasz;
            self.new_object(&mut p, checked_total(size as u64 * datasz as u64)?)?;
        }

        Ok(p)
    }

    /// Allocates a packed list of `size` bits.
    pub fn new_bit_list(&mut self, seg: SegmentRef, size: u32) -> Result<Ptr> {
        if size > MAX_LIST_LEN {
            return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
        }
        let mut p = Ptr::null();
        p.kind = PtrKind::BitList;
        p.seg = seg.0;
        p.size = size;
        p.datasz = (size + 7) / 8;
        let total = p.datasz;
        self.new_object(&mut p, total)?;
        Ok(p)
    }

    /// Allocates a list of `size` pointer slots.
    pub fn new_ptr_list(&mut self, seg: SegmentRef, size: u32) -> Result<Ptr> {
        if size > MAX_LIST_LEN {
            return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
        }
        let mut p = Ptr::null();
        p.kind = PtrKind::PtrList;
        p.seg = seg.0;
        p.size = size;
        self.new_object(&mut p, checked_total(size as u64 * 8)?)?;
        Ok(p)
    }

    /// Allocates a byte list holding `s` plus a zero terminator.
    pub fn new_string(&mut self, seg: SegmentRef, s: &str) -> Result<Ptr> {
        self.new_blob(seg, s.as_bytes(), true)
    }

    /// Allocates a byte list holding `bytes`, with no terminator.
    pub fn new_data(&mut self, seg: SegmentRef, bytes: &[u8]) -> Result<Ptr> {
        self.new_blob(seg, bytes, false)
    }

    fn new_blob(&mut self, seg: SegmentRef, bytes: &[u8], terminated: bool) -> Result<Ptr> {
        let size = bytes.len() as u64 + u64::from(terminated);
        if size > MAX_LIST_LEN as u64 {
            return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
        }
        let mut p = Ptr::null();
        p.kind = PtrKind::List;
        p.seg = seg.0;
        p.size = size as u32;
        p.datasz = 1;
        self.new_object(&mut p, size as u32)?;
        self.core.write_bytes(p.seg, p.off, bytes);
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{HeapAllocator, SegmentAllocator};
    use alloc::vec;
    use alloc::vec::Vec;

    /// Returns exactly the requested capacity, so every object fits tight.
    struct TightAllocator;

    impl SegmentAllocator for TightAllocator {
        fn create(&mut self, _id_hint: u32, min_bytes: usize) -> Option<Vec<u8>> {
            Some(vec![0; min_bytes])
        }
    }

    fn seg0<A: SegmentAllocator>(msg: &mut Message<A>) -> SegmentRef {
        let root = msg.new_root().unwrap();
        root.segment().unwrap()
    }

    #[test]
    fn struct_data_rounds_up_to_words() {
        let mut msg = Message::new(HeapAllocator::new());
        let seg = seg0(&mut msg);
        let p = msg.new_struct(seg, 12, 1).unwrap();
        assert_eq!(p.datasz, 16);
        assert_eq!(p.ptrsz, 8);
        assert!(!p.has_ptr_tag);
    }

    #[test]
    fn list_widths_promote_to_the_next_element_kind() {
        let mut msg = Message::new(HeapAllocator::new());
        let seg = seg0(&mut msg);
        assert_eq!(msg.new_list(seg, 4, 3, 0).unwrap().datasz, 4);
        assert_eq!(msg.new_list(seg, 4, 5, 0).unwrap().datasz, 8);
        assert_eq!(msg.new_list(seg, 4, 2, 0).unwrap().datasz, 2);
        assert_eq!(msg.new_list(seg, 4, 0, 0).unwrap().datasz, 0);
    }

    #[test]
    fn mixed_shape_list_gets_a_composite_tag() {
        let mut msg = Message::new(HeapAllocator::new());
        let seg = seg0(&mut msg);
        let p = msg.new_list(seg, 3, 8, 1).unwrap();
        assert!(p.has_composite_tag);
        assert_eq!(p.datasz, 8);
        assert_eq!(p.ptrsz, 8);
        // The tag ahead of the body carries the element count in its offset
        // field and the per-element shape in the size fields.
        let tag = msg.core.load64(p.seg, p.off - 8);
        assert_eq!((tag as u32) >> 2, 3);
        assert_eq!((tag >> 32) as u16, 1);
        assert_eq!((tag >> 48) as u16, 1);
    }

    #[test]
    fn segment_switch_prepends_a_scratch_tag() {
        let mut msg = Message::new(TightAllocator);
        let seg = seg0(&mut msg);
        // Segment 0 holds exactly the root word, so this spills over.
        let p = msg.new_struct(seg, 8, 0).unwrap();
        assert!(p.has_ptr_tag);
        assert_ne!(p.seg, 0);
        assert_eq!(p.off, 8);
        // The scratch word is the object's own tag with zero offset.
        assert_eq!(msg.core.load64(p.seg, 0), 1u64 << 32);
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let mut msg = Message::new(HeapAllocator::new());
        let seg = seg0(&mut msg);
        assert_eq!(
            msg.new_ptr_list(seg, 1 << 29).unwrap_err().kind,
            ErrorKind::AllocationTooLarge
        );
        assert_eq!(
            msg.new_struct(seg, (u16::MAX as u32) * 8 + 1, 0).unwrap_err().kind,
            ErrorKind::AllocationTooLarge
        );
    }
}
