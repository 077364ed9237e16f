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

//! Runtime library for a segmented, pointer-tagged binary message format.
//!
//! A message is a graph of structs and lists spread across byte segments,
//! with 64-bit little-endian pointer words tying the graph together: near
//! pointers within a segment, far and double-far pointers across segments.
//! The [`Message`] type owns the segment registry; [`Ptr`] handles are plain
//! values navigated with [`Message::getp`] and installed with
//! [`Message::setp`], which deep-copies targets that have no pointer
//! identity in the destination (other messages, list members, detached
//! bytes).
//!
//! Memory comes from the host through the [`SegmentAllocator`] callbacks;
//! the library never allocates wire bytes on its own and never frees them.
//! Decoding untrusted input is safe by construction: every dereference is
//! bounds-checked, and anything malformed collapses to a null handle.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod builder;
mod copy;
mod layout;
mod list;
mod message;
mod rbtree;
mod segment;
mod text;
mod wire;

pub use crate::layout::{Ptr, PtrKind};
pub use crate::message::{Message, SegmentRef, Segments};
pub use crate::segment::{
    AllocationStrategy, HeapAllocator, SegmentAllocator, SegmentStore, SEGMENT_ID_LOCAL,
    SUGGESTED_ALLOCATION_STRATEGY, SUGGESTED_FIRST_SEGMENT_BYTES,
};

/// Deepest pointer chain the copy engine will follow before giving up.
pub const MAX_COPY_DEPTH: usize = 32;

/// Things that can go wrong building or copying. Malformed input during
/// reads is not an error: it surfaces as a null handle instead.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The host allocator declined to provide a segment or scratch grant.
    AllocationRefused,

    /// The requested object cannot be represented in the wire format's size
    /// fields.
    AllocationTooLarge,

    /// The source graph nests deeper than [`MAX_COPY_DEPTH`].
    CopyDepthLimitExceeded,

    /// The source graph references a byte range that overlaps an earlier
    /// copy without being the same object.
    OverlappingCopySource,

    /// The pointer slot index lies outside the parent's pointer section.
    PointerIndexOutOfBounds,

    /// The parent handle has no pointer slots to write.
    NotAPointerField,

    /// A struct field accessor was applied to a non-struct handle.
    NotAStruct,

    /// The list's element width does not match the accessor.
    ElementSizeMismatch,

    /// The element or byte index lies outside the object.
    IndexOutOfBounds,

    /// Bit-block transfers must start on a byte boundary.
    UnalignedBitOffset,

    /// Segment 0 exists but has no room for the root pointer word.
    RootSlotUnavailable,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::AllocationRefused => write!(fmt, "host allocator refused the request"),
            Self::AllocationTooLarge => {
                write!(fmt, "object does not fit the wire format's size fields")
            }
            Self::CopyDepthLimitExceeded => write!(fmt, "copy depth limit exceeded"),
            Self::OverlappingCopySource => {
                write!(fmt, "copy source overlaps an already-copied range")
            }
            Self::PointerIndexOutOfBounds => write!(fmt, "pointer index out of bounds"),
            Self::NotAPointerField => write!(fmt, "handle does not address a pointer field"),
            Self::NotAStruct => write!(fmt, "handle is not a struct"),
            Self::ElementSizeMismatch => write!(fmt, "list element width mismatch"),
            Self::IndexOutOfBounds => write!(fmt, "index out of bounds"),
            Self::UnalignedBitOffset => write!(fmt, "bit offset is not byte aligned"),
            Self::RootSlotUnavailable => write!(fmt, "segment 0 has no room for the root word"),
        }
    }
}

/// An error that occurred while building or copying a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.kind.fmt(fmt)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
