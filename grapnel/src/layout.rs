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

//! Pointer words and the handles decoded from them.
//!
//! A pointer word's low two bits select struct or list; the low three bits
//! `010` and `110` select the far and double-far indirections. Decoding
//! validates every dereference against the owning segment's bounds, so a
//! handle produced here always addresses memory inside its segment.

use crate::message::{Message, MessageCore, SegmentRef};
use crate::rbtree::NIL;
use crate::segment::SegmentAllocator;

pub(crate) const STRUCT_PTR: u64 = 0;
pub(crate) const LIST_PTR: u64 = 1;
pub(crate) const FAR_PTR: u64 = 2;
pub(crate) const DOUBLE_FAR_PTR: u64 = 6;

pub(crate) const VOID_LIST: u64 = 0;
pub(crate) const BIT_1_LIST: u64 = 1;
pub(crate) const BYTE_1_LIST: u64 = 2;
pub(crate) const BYTE_2_LIST: u64 = 3;
pub(crate) const BYTE_4_LIST: u64 = 4;
pub(crate) const BYTE_8_LIST: u64 = 5;
pub(crate) const PTR_LIST: u64 = 6;
pub(crate) const COMPOSITE_LIST: u64 = 7;

/// Shape of the object a handle addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PtrKind {
    #[default]
    Null,
    Struct,
    List,
    BitList,
    PtrList,
}

/// A decoded object handle.
///
/// Handles are plain values: freely copyable, never stored on the wire, and
/// only meaningful together with the message they were obtained from. A null
/// handle is returned wherever decoding encounters malformed input, and every
/// navigation through a null handle yields null again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ptr {
    pub(crate) kind: PtrKind,
    /// Segment record slot, or NIL for a handle detached from any message.
    pub(crate) seg: u32,
    /// Byte offset of the object data within the segment.
    pub(crate) off: u32,
    /// Element count for lists; unused for structs.
    pub(crate) size: u32,
    /// Bytes of primitive data per struct or element.
    pub(crate) datasz: u32,
    /// Bytes of pointer slots per struct or element.
    pub(crate) ptrsz: u32,
    /// Data is embedded in a parent list and has no independent identity.
    pub(crate) is_list_member: bool,
    /// An 8-byte composite tag word precedes the data.
    pub(crate) has_composite_tag: bool,
    /// A scratch tag word precedes the data and may serve as a far-pointer
    /// landing pad.
    pub(crate) has_ptr_tag: bool,
}

impl Default for Ptr {
    fn default() -> Self {
        Self::null()
    }
}

impl Ptr {
    /// The handle every failed decode and navigation collapses to.
    pub const fn null() -> Self {
        Self {
            kind: PtrKind::Null,
            seg: NIL,
            off: 0,
            size: 0,
            datasz: 0,
            ptrsz: 0,
            is_list_member: false,
            has_composite_tag: false,
            has_ptr_tag: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.kind == PtrKind::Null
    }

    pub fn kind(&self) -> PtrKind {
        self.kind
    }

    /// Element count for list handles; zero for structs and null.
    pub fn len(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The segment holding the object, for directing later allocations.
    pub fn segment(&self) -> Option<SegmentRef> {
        if self.seg == NIL {
            None
        } else {
            Some(SegmentRef(self.seg))
        }
    }
}

pub(crate) enum Decoded {
    Done(Ptr),
    /// Decoding stopped at a far pointer into a segment the registry has not
    /// materialized yet.
    Need(u32),
}

/// Decodes the pointer word at `(seg, off)` against already-known segments.
///
/// Pure with respect to the message: a missing segment is reported as
/// [`Decoded::Need`] so the caller can decide whether to consult the host
/// `lookup` callback. Any bounds violation or illegal tag collapses to the
/// null handle.
pub(crate) fn decode_ptr(core: &MessageCore, seg: u32, off: u32) -> Decoded {
    let mut s = seg;
    let mut val = match core.word(s, off) {
        Some(v) => v,
        None => return Decoded::Done(Ptr::null()),
    };
    if val == 0 {
        return Decoded::Done(Ptr::null());
    }

    let mut word_end = off as i64 + 8;
    let mut has_ptr_tag = false;

    match val & 7 {
        FAR_PTR => {
            let id = (val >> 32) as u32;
            let target = match core.find_slot(id) {
                Some(t) => t,
                None => return Decoded::Need(id),
            };
            let toff = ((val as u32) >> 3) as u64 * 8;
            if toff + 8 > core.seg_len(target) as u64 {
                return Decoded::Done(Ptr::null());
            }
            s = target;
            val = core.load64(s, toff as u32);
            if val == 0 {
                return Decoded::Done(Ptr::null());
            }
            // An offset field of zero means the word is a bare tag placed
            // just ahead of the object when it was allocated.
            has_ptr_tag = (val as u32) >> 2 == 0;
            word_end = toff as i64 + 8;
        }
        DOUBLE_FAR_PTR => {
            let id = (val >> 32) as u32;
            let pad_seg = match core.find_slot(id) {
                Some(t) => t,
                None => return Decoded::Need(id),
            };
            let toff = ((val as u32) >> 3) as u64 * 8;
            if toff + 16 > core.seg_len(pad_seg) as u64 {
                return Decoded::Done(Ptr::null());
            }
            let far = core.load64(pad_seg, toff as u32);
            let tag = core.load64(pad_seg, toff as u32 + 8);
            // The pad must hold a plain far pointer followed by a struct or
            // list tag with zero offset; anything else is malformed.
            if far & 7 != FAR_PTR || (tag as u32) as u64 > LIST_PTR {
                return Decoded::Done(Ptr::null());
            }
            let data_id = (far >> 32) as u32;
            s = match core.find_slot(data_id) {
                Some(t) => t,
                None => return Decoded::Need(data_id),
            };
            // Offsets count from the end of their pointer word. Synthesizing
            // a word that ends at the segment base makes the far word's
            // offset land directly on the object data.
            word_end = 0;
            val = (((far as u32) >> 3 << 2) as u64) | tag;
        }
        _ => {}
    }

    if val & 3 > LIST_PTR {
        // A far target may not itself be far or double-far.
        return Decoded::Done(Ptr::null());
    }

    let mut data = word_end + ((((val as u32) as i32) >> 2) as i64) * 8;
    let slen = core.seg_len(s) as i64;
    if data < 0 {
        return Decoded::Done(Ptr::null());
    }

    let kind;
    let mut size = 0u32;
    let mut datasz = 0u32;
    let mut ptrsz = 0u32;
    let mut has_composite_tag = false;
    let end: i64;

    if val & 3 == STRUCT_PTR {
        kind = PtrKind::Struct;
        datasz = ((val >> 32) as u16 as u32) * 8;
        ptrsz = ((val >> 48) as u16 as u32) * 8;
        end = data + datasz as i64 + ptrsz as i64;
    } else {
        size = (val >> 35) as u32;
        match (val >> 32) & 7 {
            VOID_LIST => {
                kind = PtrKind::List;
                end = data;
            }
            BIT_1_LIST => {
                kind = PtrKind::BitList;
                datasz = (size + 7) / 8;
                end = data + datasz as i64;
            }
            BYTE_1_LIST => {
                kind = PtrKind::List;
                datasz = 1;
                end = data + size as i64;
            }
            BYTE_2_LIST => {
                kind = PtrKind::List;
                datasz = 2;
                end = data + size as i64 * 2;
            }
            BYTE_4_LIST => {
                kind = PtrKind::List;
                datasz = 4;
                end = data + size as i64 * 4;
            }
            BYTE_8_LIST => {
                kind = PtrKind::List;
                datasz = 8;
                end = data + size as i64 * 8;
            }
            PTR_LIST => {
                kind = PtrKind::PtrList;
                end = data + size as i64 * 8;
            }
            _ => {
                // Composite: the element count and per-element shape live in
                // the tag word ahead of the body; `size` so far is the body
                // word count.
                if data + 8 > slen {
                    return Decoded::Done(Ptr::null());
                }
                kind = PtrKind::List;
                let tag = core.load64(s, data as u32);
                data += 8;
                end = data + size as i64 * 8;
                datasz = ((tag >> 32) as u16 as u32) * 8;
                ptrsz = ((tag >> 48) as u16 as u32) * 8;
                size = (tag as u32) >> 2;
                has_composite_tag = true;
                if (datasz + ptrsz) as i64 * size as i64 != end - data {
                    return Decoded::Done(Ptr::null());
                }
            }
        }
    }

    if end > slen {
        return Decoded::Done(Ptr::null());
    }

    Decoded::Done(Ptr {
        kind,
        seg: s,
        off: data as u32,
        size,
        datasz,
        ptrsz,
        is_list_member: false,
        has_composite_tag,
        has_ptr_tag,
    })
}

/// Encodes `p` as a pointer word with the given byte offset from word end.
///
/// The inverse of decoding: list element kinds are chosen by `datasz` unless
/// the composite tag forces the composite form, whose size field counts body
/// words rather than elements.
pub(crate) fn ptr_value(p: &Ptr, off: i64) -> u64 {
    let mut val = ((((off / 8) as i32) << 2) as u32) as u64;

    match p.kind {
        PtrKind::Struct => {
            val |= STRUCT_PTR | ((p.datasz as u64 / 8) << 32) | ((p.ptrsz as u64 / 8) << 48);
        }
        PtrKind::List => {
            if p.has_composite_tag {
                let words = p.size as u64 * (p.datasz + p.ptrsz) as u64 / 8;
                val |= LIST_PTR | (COMPOSITE_LIST << 32) | (words << 35);
            } else {
                let elt = match p.datasz {
                    8 => BYTE_8_LIST,
                    4 => BYTE_4_LIST,
                    2 => BYTE_2_LIST,
                    1 => BYTE_1_LIST,
                    _ => VOID_LIST,
                };
                val |= LIST_PTR | (elt << 32) | ((p.size as u64) << 35);
            }
        }
        PtrKind::BitList => {
            val |= LIST_PTR | (BIT_1_LIST << 32) | ((p.size as u64) << 35);
        }
        PtrKind::PtrList => {
            val |= LIST_PTR | (PTR_LIST << 32) | ((p.size as u64) << 35);
        }
        PtrKind::Null => val = 0,
    }

    val
}

/// Byte footprint of the object data, excluding any composite tag.
pub(crate) fn data_size(p: &Ptr) -> u32 {
    match p.kind {
        PtrKind::BitList => p.datasz,
        PtrKind::PtrList => p.size * 8,
        PtrKind::Struct => p.datasz + p.ptrsz,
        PtrKind::List => p.size * (p.datasz + p.ptrsz),
        PtrKind::Null => 0,
    }
}

impl<A> Message<A>
where
    A: SegmentAllocator,
{
    pub(crate) fn read_ptr(&mut self, seg: u32, off: u32) -> Ptr {
        loop {
            match decode_ptr(&self.core, seg, off) {
                Decoded::Done(p) => return p,
                Decoded::Need(id) => {
                    if self.materialize_segment(id).is_none() {
                        return Ptr::null();
                    }
                }
            }
        }
    }

    /// Descends one level from `parent`.
    ///
    /// A list parent yields a handle to element `index`; a struct parent
    /// reads pointer slot `index`; a pointer-list parent reads word `index`.
    /// Out-of-range indices and unsuitable parents yield the null handle.
    pub fn getp(&mut self, parent: Ptr, index: u32) -> Ptr {
        match parent.kind {
            PtrKind::List => {
                if index < parent.size {
                    let mut p = Ptr::null();
                    p.kind = PtrKind::Struct;
                    p.is_list_member = true;
                    p.seg = parent.seg;
                    p.off = parent.off + index * (parent.datasz + parent.ptrsz);
                    p.datasz = parent.datasz;
                    p.ptrsz = parent.ptrsz;
                    p
                } else {
                    Ptr::null()
                }
            }
            PtrKind::Struct => {
                if (index as u64) * 8 >= parent.ptrsz as u64 {
                    Ptr::null()
                } else {
                    self.read_ptr(parent.seg, parent.off + parent.datasz + index * 8)
                }
            }
            PtrKind::PtrList => {
                if index >= parent.size {
                    Ptr::null()
                } else {
                    self.read_ptr(parent.seg, parent.off + index * 8)
                }
            }
            _ => Ptr::null(),
        }
    }
}
