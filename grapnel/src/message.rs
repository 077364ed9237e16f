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

//! Untyped container for a segmented message.
//!
//! A message owns an ordered collection of segments sharing one id space. The
//! registry tracks them two ways at once: an insertion-order list walked by
//! the bump allocator, and a red-black tree keyed by id for far-pointer
//! resolution. Segments the registry has never seen are materialized on
//! demand through the host's `lookup` callback.

use alloc::vec::Vec;

use smallvec::SmallVec;

use crate::copy::CopyState;
use crate::layout::{Ptr, PtrKind};
use crate::rbtree::{self, Links, Node, NIL};
use crate::segment::SegmentAllocator;
use crate::wire;
use crate::{Error, ErrorKind, Result};

/// Identifies a segment of a message, for directing allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentRef(pub(crate) u32);

pub(crate) struct SegmentRecord {
    pub id: u32,
    pub data: Vec<u8>,
    /// Bytes in use; only ever grows, and never past `data.len()`.
    pub len: u32,
    pub next: u32,
    pub node: Node,
}

impl SegmentRecord {
    pub fn cap(&self) -> u32 {
        self.data.len() as u32
    }
}

pub(crate) type Records = SmallVec<[SegmentRecord; 4]>;

impl Links for Records {
    fn node(&self, idx: u32) -> &Node {
        &self[idx as usize].node
    }
    fn node_mut(&mut self, idx: u32) -> &mut Node {
        &mut self[idx as usize].node
    }
}

pub(crate) struct MessageCore {
    pub recs: Records,
    pub seglist: u32,
    pub lastseg: u32,
    pub segtree: u32,
    /// Next id to assign.
    pub segnum: u32,
    pub copy: CopyState,
}

impl MessageCore {
    fn new() -> Self {
        Self {
            recs: SmallVec::new(),
            seglist: NIL,
            lastseg: NIL,
            segtree: NIL,
            segnum: 0,
            copy: CopyState::new(),
        }
    }

    /// Assigns the next id and links the record into both the insertion list
    /// and the tree. The new id is the maximum, so the record slots in as the
    /// rightmost tree leaf under the previous tail.
    pub fn append_record(&mut self, data: Vec<u8>, len: u32) -> u32 {
        let slot = self.recs.len() as u32;
        let id = self.segnum;
        self.segnum += 1;
        self.recs.push(SegmentRecord {
            id,
            data,
            len,
            next: NIL,
            node: Node::default(),
        });
        if self.lastseg != NIL {
            let last = self.lastseg as usize;
            self.recs[last].next = slot;
            self.recs[last].node.link[1] = slot;
            self.recs[slot as usize].node.parent = self.lastseg;
        } else {
            self.seglist = slot;
        }
        self.lastseg = slot;
        self.segtree = rbtree::insert_rebalance(&mut self.recs, self.segtree, slot);
        slot
    }

    /// Links a host-materialized record under an id that was skipped over
    /// earlier. The record goes to the front of the insertion list.
    pub fn insert_record_with_id(&mut self, id: u32, data: Vec<u8>, len: u32) -> u32 {
        let slot = self.recs.len() as u32;
        let mut parent = NIL;
        let mut dir = 0;
        let mut x = self.segtree;
        while x != NIL {
            parent = x;
            dir = (id > self.recs[x as usize].id) as usize;
            x = self.recs[x as usize].node.link[dir];
        }
        let next = self.seglist;
        self.recs.push(SegmentRecord {
            id,
            data,
            len,
            next,
            node: Node {
                parent,
                ..Node::default()
            },
        });
        self.seglist = slot;
        if parent != NIL {
            self.recs[parent as usize].node.link[dir] = slot;
        }
        self.segtree = rbtree::insert_rebalance(&mut self.recs, self.segtree, slot);
        slot
    }

    pub fn find_slot(&self, id: u32) -> Option<u32> {
        if id >= self.segnum {
            return None;
        }
        let mut x = self.segtree;
        while x != NIL {
            let rec = &self.recs[x as usize];
            if id == rec.id {
                return Some(x);
            }
            x = rec.node.link[(id > rec.id) as usize];
        }
        None
    }

    pub fn seg_len(&self, slot: u32) -> u32 {
        self.recs[slot as usize].len
    }

    pub fn seg_id(&self, slot: u32) -> u32 {
        self.recs[slot as usize].id
    }

    /// Loads the word at `off`, or `None` when it does not lie fully within
    /// the used part of the segment.
    pub fn word(&self, slot: u32, off: u32) -> Option<u64> {
        let rec = self.recs.get(slot as usize)?;
        if off as u64 + 8 > rec.len as u64 {
            return None;
        }
        Some(wire::load64(&rec.data, off as usize))
    }

    pub fn load64(&self, slot: u32, off: u32) -> u64 {
        wire::load64(&self.recs[slot as usize].data, off as usize)
    }

    pub fn store64(&mut self, slot: u32, off: u32, value: u64) {
        wire::store64(&mut self.recs[slot as usize].data, off as usize, value);
    }

    /// Borrow of `n` used bytes starting at `off`.
    pub fn slice(&self, slot: u32, off: u32, n: u32) -> Option<&[u8]> {
        let rec = self.recs.get(slot as usize)?;
        let used = rec.data.get(..rec.len as usize)?;
        let start = off as usize;
        used.get(start..start.checked_add(n as usize)?)
    }

    pub fn slice_mut(&mut self, slot: u32, off: u32, n: u32) -> Option<&mut [u8]> {
        let rec = self.recs.get_mut(slot as usize)?;
        let start = off as usize;
        rec.data.get_mut(start..start.checked_add(n as usize)?)
    }

    /// Copies caller bytes into a freshly allocated region.
    pub fn write_bytes(&mut self, slot: u32, off: u32, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        let start = off as usize;
        self.recs[slot as usize].data[start..start + src.len()].copy_from_slice(src);
    }

    pub fn zero_range(&mut self, slot: u32, off: u32, n: u32) {
        if n == 0 {
            return;
        }
        let start = off as usize;
        self.recs[slot as usize].data[start..start + n as usize].fill(0);
    }

    /// Copies between segments of this message. The destination is always a
    /// freshly allocated region, so same-segment copies never overlap it.
    pub fn copy_local(&mut self, dst: (u32, u32), src: (u32, u32), n: usize) {
        if n == 0 {
            return;
        }
        let (di, si) = (dst.0 as usize, src.0 as usize);
        let (d, s) = (dst.1 as usize, src.1 as usize);
        if di == si {
            self.recs[di].data.copy_within(s..s + n, d);
        } else if di < si {
            let (lo, hi) = self.recs.split_at_mut(si);
            lo[di].data[d..d + n].copy_from_slice(&hi[0].data[s..s + n]);
        } else {
            let (lo, hi) = self.recs.split_at_mut(di);
            hi[0].data[d..d + n].copy_from_slice(&lo[si].data[s..s + n]);
        }
    }
}

/// An untyped message: a registry of segments plus the host allocator that
/// feeds it.
pub struct Message<A>
where
    A: SegmentAllocator,
{
    pub(crate) allocator: A,
    pub(crate) core: MessageCore,
}

impl<A> Message<A>
where
    A: SegmentAllocator,
{
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            core: MessageCore::new(),
        }
    }

    /// Retrieves the underlying allocator, dropping all segments.
    pub fn into_allocator(self) -> A {
        self.allocator
    }

    /// Asks the host for the segment `id` and registers it on success.
    pub(crate) fn materialize_segment(&mut self, id: u32) -> Option<u32> {
        let buf = self.allocator.lookup(id)?;
        let len = buf.len() as u32;
        Some(if id < self.core.segnum {
            self.core.insert_record_with_id(id, buf, len)
        } else {
            self.core.segnum = id;
            self.core.append_record(buf, len)
        })
    }

    pub(crate) fn segment_slot(&mut self, id: u32) -> Option<u32> {
        match self.core.find_slot(id) {
            Some(slot) => Some(slot),
            None => self.materialize_segment(id),
        }
    }

    /// Resolves `id` to a segment of this message, consulting the host
    /// `lookup` callback if the registry has not seen it yet.
    pub fn segment(&mut self, id: u32) -> Option<SegmentRef> {
        self.segment_slot(id).map(SegmentRef)
    }

    /// Bump-allocates `bytes` in the first segment with room, asking the host
    /// to create a new segment when none fits.
    pub(crate) fn alloc(&mut self, bytes: u32) -> Result<(u32, u32)> {
        let mut slot = self.core.seglist;
        while slot != NIL {
            let rec = &self.core.recs[slot as usize];
            if rec.len as u64 + bytes as u64 <= rec.cap() as u64 {
                let off = rec.len;
                self.core.recs[slot as usize].len += bytes;
                return Ok((slot, off));
            }
            slot = rec.next;
        }
        let buf = self
            .allocator
            .create(self.core.segnum, bytes as usize)
            .filter(|b| b.len() >= bytes as usize && b.len() <= u32::MAX as usize)
            .ok_or_else(|| Error::from_kind(ErrorKind::AllocationRefused))?;
        Ok((self.core.append_record(buf, bytes), 0))
    }

    /// Reads the root pointer out of segment 0.
    ///
    /// Yields the null handle when segment 0 is absent, too short to hold the
    /// root word, or holds a malformed pointer.
    pub fn get_root(&mut self) -> Ptr {
        match self.segment_slot(0) {
            Some(slot) if self.core.seg_len(slot) >= 8 => self.read_ptr(slot, 0),
            _ => Ptr::null(),
        }
    }

    /// Claims the first 8 bytes of segment 0 as the root pointer slot and
    /// returns a one-element pointer list over it.
    pub fn new_root(&mut self) -> Result<Ptr> {
        let slot = match self.segment_slot(0) {
            Some(slot) => slot,
            None => self.alloc(8)?.0,
        };
        if self.core.seg_len(slot) < 8 {
            return Err(Error::from_kind(ErrorKind::RootSlotUnavailable));
        }
        let mut p = Ptr::null();
        p.kind = PtrKind::PtrList;
        p.seg = slot;
        p.size = 1;
        Ok(p)
    }

    /// Iterates segments in insertion order as `(id, used bytes)`, for the
    /// host to frame onto a transport.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            core: &self.core,
            cur: self.core.seglist,
        }
    }
}

pub struct Segments<'a> {
    core: &'a MessageCore,
    cur: u32,
}

impl<'a> Iterator for Segments<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let rec = &self.core.recs[self.cur as usize];
        self.cur = rec.next;
        Some((rec.id, &rec.data[..rec.len as usize]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{AllocationStrategy, HeapAllocator, SegmentStore};
    use alloc::vec;

    #[test]
    fn empty_message_has_null_root() {
        let mut msg = Message::new(HeapAllocator::new());
        assert!(msg.get_root().is_null());
    }

    #[test]
    fn new_root_is_stable_across_calls() {
        let mut msg = Message::new(HeapAllocator::new());
        let a = msg.new_root().unwrap();
        let b = msg.new_root().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.kind(), PtrKind::PtrList);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn allocation_walks_segments_in_insertion_order() {
        let alloc = HeapAllocator::new()
            .first_segment_bytes(16)
            .allocation_strategy(AllocationStrategy::FixedSize);
        let mut msg = Message::new(alloc);
        assert_eq!(msg.alloc(8).unwrap(), (0, 0));
        assert_eq!(msg.alloc(8).unwrap(), (0, 8));
        // First segment is full; a second one gets created with id 1.
        assert_eq!(msg.alloc(8).unwrap(), (1, 0));
        assert_eq!(msg.alloc(8).unwrap(), (1, 8));
        let ids: vec::Vec<u32> = msg.segments().map(|(id, _)| id).collect();
        assert_eq!(ids, [0, 1]);
    }

    #[test]
    fn refusing_allocator_surfaces_as_error() {
        let mut msg = Message::new(SegmentStore::new(vec![]));
        assert_eq!(
            msg.alloc(8).unwrap_err().kind,
            ErrorKind::AllocationRefused
        );
        assert!(msg.new_root().is_err());
    }

    #[test]
    fn segments_materialize_lazily_in_any_order() {
        let store = SegmentStore::new(vec![vec![0; 8], vec![0; 16], vec![0; 24]]);
        let mut msg = Message::new(store);
        assert!(msg.segment(2).is_some());
        assert!(msg.segment(0).is_some());
        assert!(msg.segment(1).is_some());
        // Each resolves through the tree afterwards without a second lookup.
        for id in 0..3 {
            let slot = msg.core.find_slot(id).unwrap();
            assert_eq!(msg.core.seg_id(slot), id);
        }
        assert_eq!(msg.core.seg_len(msg.core.find_slot(2).unwrap()), 24);
        assert!(msg.segment(3).is_none());
    }
}
