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

//! Host-side segment provisioning.

use alloc::vec;
use alloc::vec::Vec;

/// Reserved `id_hint` passed to [`SegmentAllocator::create`] when the library
/// needs scratch memory for copy bookkeeping rather than a wire segment.
pub const SEGMENT_ID_LOCAL: u32 = !0;

/// An object that provides the memory underlying a message.
///
/// Segment buffers are owned by the message for its lifetime and handed back
/// when it is dropped; the library never frees them itself. Implementations
/// must ensure all of the following:
///   1. Buffers returned by `create` are zero-filled and at least `min_bytes`
///      long. Implementations commonly return much more than the minimum, to
///      reduce the total number of segments needed.
///   2. Buffers returned by `lookup` hold the complete wire content of the
///      requested segment.
pub trait SegmentAllocator {
    /// Provides a fresh segment buffer with capacity of at least `min_bytes`.
    ///
    /// `id_hint` is the id the new segment will be assigned, and is purely
    /// informational except for the reserved value [`SEGMENT_ID_LOCAL`],
    /// which requests scratch memory that never becomes part of the wire
    /// message. Returning `None` declines the allocation; the affected
    /// operation fails without retrying.
    fn create(&mut self, id_hint: u32, min_bytes: usize) -> Option<Vec<u8>>;

    /// Materializes the segment `id` on demand, for messages whose segments
    /// are loaded lazily. Called only while resolving a far or double-far
    /// pointer whose target segment has not been seen yet. The returned
    /// buffer is taken to be fully in use.
    fn lookup(&mut self, id: u32) -> Option<Vec<u8>> {
        let _ = id;
        None
    }
}

impl<A> SegmentAllocator for &mut A
where
    A: SegmentAllocator,
{
    fn create(&mut self, id_hint: u32, min_bytes: usize) -> Option<Vec<u8>> {
        (*self).create(id_hint, min_bytes)
    }

    fn lookup(&mut self, id: u32) -> Option<Vec<u8>> {
        (*self).lookup(id)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum AllocationStrategy {
    /// Allocates the same number of bytes for each segment, to the extent
    /// possible. This strategy is primarily useful for testing cross-segment
    /// pointers.
    FixedSize,

    /// Increases segment size by a multiplicative factor for each subsequent
    /// segment.
    GrowHeuristically,
}

pub const SUGGESTED_FIRST_SEGMENT_BYTES: usize = 8192;
pub const SUGGESTED_ALLOCATION_STRATEGY: AllocationStrategy = AllocationStrategy::GrowHeuristically;

/// Standard segment allocator. Every segment is a freshly zeroed heap buffer.
#[derive(Debug)]
pub struct HeapAllocator {
    // Minimum size of the next allocation, in bytes.
    next_size: usize,

    // How to update next_size after an allocation.
    allocation_strategy: AllocationStrategy,

    // Maximum bytes to allocate in a single segment.
    max_segment_bytes: usize,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self {
            next_size: SUGGESTED_FIRST_SEGMENT_BYTES,
            allocation_strategy: SUGGESTED_ALLOCATION_STRATEGY,
            max_segment_bytes: 1 << 30,
        }
    }
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of the initial segment in bytes.
    pub fn first_segment_bytes(mut self, value: usize) -> Self {
        assert!(value <= self.max_segment_bytes);
        self.next_size = value;
        self
    }

    /// Sets the allocation strategy for segments after the first one.
    pub fn allocation_strategy(mut self, value: AllocationStrategy) -> Self {
        self.allocation_strategy = value;
        self
    }

    /// Sets the maximum number of bytes allowed in a single allocation.
    pub fn max_segment_bytes(mut self, value: usize) -> Self {
        assert!(self.next_size <= value);
        self.max_segment_bytes = value;
        self
    }
}

impl SegmentAllocator for HeapAllocator {
    fn create(&mut self, id_hint: u32, min_bytes: usize) -> Option<Vec<u8>> {
        if id_hint == SEGMENT_ID_LOCAL {
            // Scratch requests are small and never grow the wire message.
            return Some(vec![0; min_bytes]);
        }
        let size = core::cmp::max(min_bytes, self.next_size);
        if let AllocationStrategy::GrowHeuristically = self.allocation_strategy {
            if size < self.max_segment_bytes - self.next_size {
                self.next_size += size;
            } else {
                self.next_size = self.max_segment_bytes;
            }
        }
        Some(vec![0; size])
    }
}

/// Read-side host over pre-framed segment buffers.
///
/// The caller parses whatever framing its transport uses, deposits one buffer
/// per segment id, and lets the message pull them in lazily through
/// [`SegmentAllocator::lookup`] as far pointers are traversed. `create` always
/// declines, so a message backed by a `SegmentStore` is read-only.
pub struct SegmentStore {
    segments: Vec<Option<Vec<u8>>>,
}

impl SegmentStore {
    pub fn new(segments: Vec<Vec<u8>>) -> Self {
        Self {
            segments: segments.into_iter().map(Some).collect(),
        }
    }
}

impl SegmentAllocator for SegmentStore {
    fn create(&mut self, _id_hint: u32, _min_bytes: usize) -> Option<Vec<u8>> {
        None
    }

    fn lookup(&mut self, id: u32) -> Option<Vec<u8>> {
        self.segments.get_mut(id as usize)?.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_allocator_grows_heuristically() {
        let mut alloc = HeapAllocator::new().first_segment_bytes(64);
        assert_eq!(alloc.create(0, 8).unwrap().len(), 64);
        assert_eq!(alloc.create(1, 8).unwrap().len(), 128);
        assert!(alloc.create(2, 1024).unwrap().len() >= 1024);
    }

    #[test]
    fn fixed_size_allocator_does_not_grow() {
        let mut alloc = HeapAllocator::new()
            .first_segment_bytes(32)
            .allocation_strategy(AllocationStrategy::FixedSize);
        assert_eq!(alloc.create(0, 8).unwrap().len(), 32);
        assert_eq!(alloc.create(1, 8).unwrap().len(), 32);
    }

    #[test]
    fn segment_store_hands_each_segment_out_once() {
        let mut store = SegmentStore::new(vec![vec![1u8; 8], vec![2u8; 8]]);
        assert!(store.create(0, 8).is_none());
        assert_eq!(store.lookup(1).unwrap(), vec![2u8; 8]);
        assert!(store.lookup(1).is_none());
        assert!(store.lookup(7).is_none());
    }
}
