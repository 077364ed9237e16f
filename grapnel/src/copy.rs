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

//! Pointer installation and sub-graph copying.
//!
//! Installing a handle into a pointer slot writes a near tag when source and
//! destination share a segment, a far pointer otherwise, and a double-far
//! indirection when neither side has room for the tag. Targets that live
//! outside the destination message (foreign messages, detached byte slices,
//! list members) are deep-copied instead, iteratively and with a copy tree
//! that detects recursion and shared sub-objects by source byte range.

use alloc::vec::Vec;

use crate::layout::{self, Decoded, Ptr, PtrKind, DOUBLE_FAR_PTR, FAR_PTR};
use crate::message::{Message, MessageCore, SegmentRef};
use crate::rbtree::{self, Links, Node, NIL};
use crate::segment::{SegmentAllocator, SEGMENT_ID_LOCAL};
use crate::{Error, ErrorKind, Result, MAX_COPY_DEPTH};

/// One already-copied sub-object, keyed by its source byte range.
pub(crate) struct CopyEntry {
    /// Source address space: 0 for the owning message, a fresh value for
    /// every cross-message or detached-source installation.
    pub space: u32,
    pub fseg: u32,
    pub fdata: u32,
    pub fsize: u32,
    pub from: Ptr,
    pub to: Ptr,
    pub node: Node,
}

pub(crate) struct CopyState {
    pub entries: Vec<CopyEntry>,
    pub root: u32,
    /// Entry capacity granted by the host through scratch requests.
    pub granted: usize,
    pub next_space: u32,
}

impl CopyState {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            root: NIL,
            granted: 0,
            next_space: 1,
        }
    }
}

impl Links for Vec<CopyEntry> {
    fn node(&self, idx: u32) -> &Node {
        &self[idx as usize].node
    }
    fn node_mut(&mut self, idx: u32) -> &mut Node {
        &mut self[idx as usize].node
    }
}

/// Where the bytes behind a write target live.
#[derive(Clone, Copy)]
pub(crate) enum Source<'a> {
    /// The destination message itself.
    Local,
    /// Another, fully materialized message.
    Foreign(&'a MessageCore),
    /// A caller-owned byte slice with no segment identity.
    Bytes(&'a [u8]),
}

enum NoCopy {
    Done,
    NeedCopy,
}

struct CopyStack {
    to: [Ptr; MAX_COPY_DEPTH],
    from: [Ptr; MAX_COPY_DEPTH],
    dep: usize,
}

impl CopyStack {
    fn new() -> Self {
        Self {
            to: [Ptr::null(); MAX_COPY_DEPTH],
            from: [Ptr::null(); MAX_COPY_DEPTH],
            dep: 0,
        }
    }

    fn push(&mut self, t: Ptr, f: Ptr) {
        self.to[self.dep] = t;
        self.from[self.dep] = f;
        self.dep += 1;
    }
}

fn far_value(id: u32, byte_off: u32) -> u64 {
    FAR_PTR | byte_off as u64 | ((id as u64) << 32)
}

fn double_far_value(id: u32, byte_off: u32) -> u64 {
    DOUBLE_FAR_PTR | byte_off as u64 | ((id as u64) << 32)
}

/// Handle equality as the copy tree sees it: same data, same shape. The
/// scratch-tag and list-member flags do not contribute to identity.
fn same_object(a: &Ptr, b: &Ptr) -> bool {
    a.seg == b.seg
        && a.off == b.off
        && a.kind == b.kind
        && a.size == b.size
        && a.datasz == b.datasz
        && a.ptrsz == b.ptrsz
        && a.has_composite_tag == b.has_composite_tag
}

impl<A> Message<A>
where
    A: SegmentAllocator,
{
    /// Installs `target` into pointer slot `index` of `parent`.
    ///
    /// `target` must be a handle of this message; handles of other messages
    /// go through [`Message::setp_from`]. A null target clears the slot. A
    /// list-member target is deep-copied, since its data has no independent
    /// pointer identity.
    pub fn setp(&mut self, parent: Ptr, index: u32, target: Ptr) -> Result<()> {
        self.write_ptr(Source::Local, parent, index, target, 0)
    }

    /// Installs a deep copy of `target`, a handle of `source`, into pointer
    /// slot `index` of `parent`.
    ///
    /// Recursive and shared sub-objects of the source collapse onto single
    /// copies in the destination. The source is read through its
    /// already-materialized segments only.
    pub fn setp_from<B>(
        &mut self,
        parent: Ptr,
        index: u32,
        source: &Message<B>,
        target: Ptr,
    ) -> Result<()>
    where
        B: SegmentAllocator,
    {
        self.write_ptr(Source::Foreign(&source.core), parent, index, target, 0)
    }

    pub(crate) fn write_ptr(
        &mut self,
        src: Source<'_>,
        parent: Ptr,
        index: u32,
        target: Ptr,
        zeros: u32,
    ) -> Result<()> {
        let space = match src {
            Source::Local => 0,
            _ => {
                let s = self.core.copy.next_space;
                self.core.copy.next_space += 1;
                s
            }
        };
        let mut stack = CopyStack::new();

        let (wseg, woff) = match parent.kind {
            PtrKind::List => {
                // Writing a struct into a struct-list element copies the
                // data in place, truncated to the element shape, then walks
                // the common prefix of the two pointer sections.
                if index >= parent.size || target.kind != PtrKind::Struct {
                    return Err(Error::from_kind(ErrorKind::NotAPointerField));
                }
                let d = parent.off + index * (parent.datasz + parent.ptrsz);
                let data_n = core::cmp::min(parent.datasz, target.datasz);
                self.copy_from_source(src, (parent.seg, d), (target.seg, target.off), data_n as usize)?;
                self.core.zero_range(parent.seg, d + data_n, parent.datasz - data_n);
                let dp = d + parent.datasz;
                let ptr_n = core::cmp::min(parent.ptrsz, target.ptrsz);
                self.core.zero_range(parent.seg, dp + ptr_n, parent.ptrsz - ptr_n);

                let mut tn = Ptr::null();
                tn.kind = PtrKind::PtrList;
                tn.seg = parent.seg;
                tn.off = dp;
                tn.size = ptr_n / 8;
                let mut fw = Ptr::null();
                fw.seg = target.seg;
                fw.off = target.off + target.datasz;
                stack.push(tn, fw);
                return self.run_copy_loop(src, space, &mut stack);
            }
            PtrKind::PtrList => {
                if index >= parent.size {
                    return Err(Error::from_kind(ErrorKind::PointerIndexOutOfBounds));
                }
                (parent.seg, parent.off + index * 8)
            }
            PtrKind::Struct => {
                if (index as u64) * 8 >= parent.ptrsz as u64 {
                    return Err(Error::from_kind(ErrorKind::PointerIndexOutOfBounds));
                }
                (parent.seg, parent.off + parent.datasz + index * 8)
            }
            _ => return Err(Error::from_kind(ErrorKind::NotAPointerField)),
        };

        match self.write_ptr_no_copy(wseg, woff, target, matches!(src, Source::Local))? {
            NoCopy::Done => return Ok(()),
            NoCopy::NeedCopy => {}
        }

        self.copy_object(src, space, parent.seg, (wseg, woff), target, &mut stack, zeros)?;
        self.run_copy_loop(src, space, &mut stack)
    }

    /// Writes `p` into the word at `(dseg, doff)` without copying, when the
    /// target already has an identity in this message. Reports `NeedCopy`
    /// for targets that can only be represented by value.
    fn write_ptr_no_copy(&mut self, dseg: u32, doff: u32, p: Ptr, local: bool) -> Result<NoCopy> {
        if p.is_null() {
            self.core.store64(dseg, doff, 0);
            return Ok(NoCopy::Done);
        }
        if !local || p.seg == NIL || p.is_list_member {
            return Ok(NoCopy::NeedCopy);
        }

        let pdata = if p.has_composite_tag { p.off - 8 } else { p.off };

        if p.seg == dseg {
            let off = pdata as i64 - doff as i64 - 8;
            self.core.store64(dseg, doff, layout::ptr_value(&p, off));
            return Ok(NoCopy::Done);
        }

        let tid = self.core.seg_id(p.seg);

        if p.has_ptr_tag {
            // The object was moved to a fresh segment at allocation time and
            // carries a bare tag just ahead of its data; far-point at that.
            self.core.store64(dseg, doff, far_value(tid, pdata - 8));
            return Ok(NoCopy::Done);
        }

        let (tlen, tcap) = {
            let rec = &self.core.recs[p.seg as usize];
            (rec.len, rec.cap())
        };
        if tlen as u64 + 8 <= tcap as u64 {
            // The target segment has room for a trailing tag.
            self.core.recs[p.seg as usize].len += 8;
            let tag = layout::ptr_value(&p, pdata as i64 - tlen as i64 - 8);
            self.core.store64(p.seg, tlen, tag);
            self.core.store64(dseg, doff, far_value(tid, tlen));
            return Ok(NoCopy::Done);
        }

        // No tag room on either end of the far hop: spend 16 bytes on a
        // landing pad, preferring the segment holding the pointer word.
        let (dlen, dcap) = {
            let rec = &self.core.recs[dseg as usize];
            (rec.len, rec.cap())
        };
        let (pad_seg, pad_off) = if dlen as u64 + 16 <= dcap as u64 {
            self.core.recs[dseg as usize].len += 16;
            (dseg, dlen)
        } else {
            self.alloc(16)?
        };
        self.core.store64(pad_seg, pad_off, far_value(tid, pdata));
        self.core.store64(pad_seg, pad_off + 8, layout::ptr_value(&p, 0));
        let pad_id = self.core.seg_id(pad_seg);
        self.core.store64(dseg, doff, double_far_value(pad_id, pad_off));
        Ok(NoCopy::Done)
    }

    /// Copies the object behind `f` into this message and points the word at
    /// `(wseg, woff)` at the copy, reusing an earlier copy when the copy
    /// tree already covers the source range.
    #[allow(clippy::too_many_arguments)]
    fn copy_object(
        &mut self,
        src: Source<'_>,
        space: u32,
        dseg: u32,
        (wseg, woff): (u32, u32),
        f: Ptr,
        stack: &mut CopyStack,
        zeros: u32,
    ) -> Result<()> {
        if f.is_null() {
            self.core.store64(wseg, woff, 0);
            return Ok(());
        }

        let mut fsize = layout::data_size(&f);
        let mut fdata = f.off;
        if f.has_composite_tag {
            fsize += 8;
            fdata -= 8;
        }

        // List members are always copied rather than indexed: their data is
        // owned by the enclosing list. Zero-sized objects never overlap
        // anything and carry no data to share, so neither enters the tree.
        let track = fsize != 0 && !f.is_list_member;

        let mut parent = NIL;
        let mut dir = 0usize;
        if track {
            let mut cur = self.core.copy.root;
            while cur != NIL {
                let e = &self.core.copy.entries[cur as usize];
                let d = if (space, f.seg) < (e.space, e.fseg) {
                    0
                } else if (space, f.seg) > (e.space, e.fseg) {
                    1
                } else if fdata as u64 + fsize as u64 <= e.fdata as u64 {
                    0
                } else if e.fdata as u64 + e.fsize as u64 <= fdata as u64 {
                    1
                } else if same_object(&f, &e.from) {
                    // Already copied; point at the existing destination.
                    let to = e.to;
                    self.write_ptr_no_copy(wseg, woff, to, true)?;
                    return Ok(());
                } else {
                    return Err(Error::from_kind(ErrorKind::OverlappingCopySource));
                };
                parent = cur;
                dir = d;
                cur = self.core.copy.entries[cur as usize].node.link[d];
            }
        }

        let t = self.new_clone(dseg, &f)?;
        if track {
            self.insert_copy_entry(
                CopyEntry {
                    space,
                    fseg: f.seg,
                    fdata,
                    fsize,
                    from: f,
                    to: t,
                    node: Node::default(),
                },
                parent,
                dir,
            )?;
        }
        self.write_ptr_no_copy(wseg, woff, t, true)?;
        self.copy_payload(src, t, f, stack, zeros)
    }

    /// Moves the object's data into the clone and queues whatever pointer
    /// walks the shape requires.
    fn copy_payload(
        &mut self,
        src: Source<'_>,
        t: Ptr,
        f: Ptr,
        stack: &mut CopyStack,
        zeros: u32,
    ) -> Result<()> {
        match t.kind {
            PtrKind::Struct => {
                if t.datasz > 0 {
                    // The `zeros` tail is guaranteed zero in the fresh clone
                    // and must not be read from the source.
                    let n = (t.datasz - zeros.min(t.datasz)) as usize;
                    self.copy_from_source(src, (t.seg, t.off), (f.seg, f.off), n)?;
                }
                if t.ptrsz > 0 {
                    let mut tn = Ptr::null();
                    tn.kind = PtrKind::PtrList;
                    tn.seg = t.seg;
                    tn.off = t.off + t.datasz;
                    tn.size = t.ptrsz / 8;
                    let mut fw = Ptr::null();
                    fw.seg = f.seg;
                    fw.off = f.off + t.datasz;
                    stack.push(tn, fw);
                }
                Ok(())
            }
            PtrKind::BitList => {
                self.copy_from_source(src, (t.seg, t.off), (f.seg, f.off), t.datasz as usize)
            }
            PtrKind::List => {
                if t.size == 0 {
                    Ok(())
                } else if t.datasz > 0 && t.ptrsz > 0 {
                    stack.push(t, f);
                    Ok(())
                } else if t.datasz > 0 {
                    let total = t.size as u64 * t.datasz as u64;
                    let n = total.saturating_sub(zeros as u64) as usize;
                    self.copy_from_source(src, (t.seg, t.off), (f.seg, f.off), n)
                } else {
                    let mut tn = t;
                    tn.kind = PtrKind::PtrList;
                    tn.size = t.size * (t.ptrsz / 8);
                    if tn.size > 0 {
                        stack.push(tn, f);
                    }
                    Ok(())
                }
            }
            PtrKind::PtrList => {
                if t.size > 0 {
                    stack.push(t, f);
                }
                Ok(())
            }
            PtrKind::Null => Ok(()),
        }
    }

    /// Drains the work stack: composite lists walk element by element, every
    /// other frame is a pointer-word walk.
    fn run_copy_loop(&mut self, src: Source<'_>, space: u32, stack: &mut CopyStack) -> Result<()> {
        while stack.dep > 0 {
            if stack.dep + 1 == MAX_COPY_DEPTH {
                return Err(Error::from_kind(ErrorKind::CopyDepthLimitExceeded));
            }
            let d = stack.dep - 1;
            let tc = stack.to[d];
            if tc.size == 0 {
                stack.dep -= 1;
                continue;
            }
            let fc = stack.from[d];

            match tc.kind {
                PtrKind::List => {
                    // Current composite element: its destination already
                    // lives inside the cloned body, so only the payload
                    // moves and only the pointer section recurses.
                    let mut tn = tc;
                    let mut fw = fc;
                    tn.kind = PtrKind::Struct;
                    fw.kind = PtrKind::Struct;
                    tn.is_list_member = true;
                    fw.is_list_member = true;
                    tn.size = 0;
                    fw.size = 0;
                    tn.has_composite_tag = false;
                    fw.has_composite_tag = false;
                    self.copy_payload(src, tn, fw, stack, 0)?;

                    let stride = tc.datasz + tc.ptrsz;
                    stack.to[d].off += stride;
                    stack.from[d].off += stride;
                    stack.to[d].size -= 1;
                }
                _ => {
                    let fw = self.source_read_ptr(src, fc.seg, fc.off);
                    self.copy_object(src, space, tc.seg, (tc.seg, tc.off), fw, stack, 0)?;
                    stack.to[d].off += 8;
                    stack.from[d].off += 8;
                    stack.to[d].size -= 1;
                }
            }
        }
        Ok(())
    }

    fn new_clone(&mut self, dseg: u32, f: &Ptr) -> Result<Ptr> {
        let seg = SegmentRef(dseg);
        match f.kind {
            PtrKind::Struct => self.new_struct(seg, f.datasz, (f.ptrsz / 8) as u16),
            PtrKind::PtrList => self.new_ptr_list(seg, f.size),
            PtrKind::BitList => self.new_bit_list(seg, f.size),
            PtrKind::List => self.new_list(seg, f.size, f.datasz, (f.ptrsz / 8) as u16),
            PtrKind::Null => Ok(*f),
        }
    }

    /// Adds a copy-tree entry under `(parent, dir)`, asking the host for a
    /// scratch grant whenever the arena is out of granted capacity.
    fn insert_copy_entry(&mut self, mut entry: CopyEntry, parent: u32, dir: usize) -> Result<()> {
        if self.core.copy.entries.len() >= self.core.copy.granted {
            let need = core::mem::size_of::<CopyEntry>();
            let grant = self
                .allocator
                .create(SEGMENT_ID_LOCAL, need)
                .ok_or_else(|| Error::from_kind(ErrorKind::AllocationRefused))?;
            let add = (grant.len() / need).max(1);
            self.core.copy.granted += add;
            self.core.copy.entries.reserve(add);
        }
        let copy = &mut self.core.copy;
        let idx = copy.entries.len() as u32;
        entry.node = Node {
            parent,
            ..Node::default()
        };
        copy.entries.push(entry);
        if parent != NIL {
            copy.entries[parent as usize].node.link[dir] = idx;
        }
        copy.root = rbtree::insert_rebalance(&mut copy.entries, copy.root, idx);
        Ok(())
    }

    fn source_read_ptr(&mut self, src: Source<'_>, seg: u32, off: u32) -> Ptr {
        match src {
            Source::Local => self.read_ptr(seg, off),
            Source::Foreign(core) => match layout::decode_ptr(core, seg, off) {
                Decoded::Done(p) => p,
                Decoded::Need(_) => Ptr::null(),
            },
            Source::Bytes(_) => Ptr::null(),
        }
    }

    fn copy_from_source(
        &mut self,
        src: Source<'_>,
        dst: (u32, u32),
        from: (u32, u32),
        n: usize,
    ) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        match src {
            Source::Local => {
                self.core.copy_local(dst, from, n);
                Ok(())
            }
            Source::Foreign(core) => {
                let s = core
                    .slice(from.0, from.1, n as u32)
                    .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
                let d = self
                    .core
                    .slice_mut(dst.0, dst.1, n as u32)
                    .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
                d.copy_from_slice(s);
                Ok(())
            }
            Source::Bytes(b) => {
                let start = from.1 as usize;
                let s = b
                    .get(start..start.checked_add(n).unwrap_or(usize::MAX))
                    .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
                let d = self
                    .core
                    .slice_mut(dst.0, dst.1, n as u32)
                    .ok_or_else(|| Error::from_kind(ErrorKind::IndexOutOfBounds))?;
                d.copy_from_slice(s);
                Ok(())
            }
        }
    }
}
