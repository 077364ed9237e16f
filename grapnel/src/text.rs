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

//! Text and data blobs.
//!
//! Both are byte lists; text additionally ends in a zero terminator that the
//! accessors hide. Writes install a detached handle over the caller's bytes
//! and go through the copy path, with the terminator elided from the read so
//! only the caller's own buffer is ever touched.

use crate::copy::Source;
use crate::layout::{Ptr, PtrKind};
use crate::message::Message;
use crate::rbtree::NIL;
use crate::segment::SegmentAllocator;
use crate::{Error, ErrorKind, Result};

fn detached_bytes(len: u64, terminated: bool) -> Result<Ptr> {
    let size = len + u64::from(terminated);
    if size > u32::MAX as u64 {
        return Err(Error::from_kind(ErrorKind::AllocationTooLarge));
    }
    let mut p = Ptr::null();
    p.kind = PtrKind::List;
    p.seg = NIL;
    p.size = size as u32;
    p.datasz = 1;
    Ok(p)
}

impl<A> Message<A>
where
    A: SegmentAllocator,
{
    /// Reads pointer slot `index` of `parent` as text.
    ///
    /// Yields the bytes without their terminator, and `None` when the slot
    /// does not hold a terminated byte list.
    pub fn get_text(&mut self, parent: Ptr, index: u32) -> Option<&[u8]> {
        let m = self.getp(parent, index);
        if m.kind == PtrKind::List && m.datasz == 1 && m.size > 0 {
            let bytes = self.core.slice(m.seg, m.off, m.size)?;
            if bytes[m.size as usize - 1] == 0 {
                return Some(&bytes[..m.size as usize - 1]);
            }
        }
        None
    }

    /// Reads pointer slot `index` of `parent` as a raw byte list.
    pub fn get_data(&mut self, parent: Ptr, index: u32) -> Option<&[u8]> {
        let m = self.getp(parent, index);
        if m.kind == PtrKind::List && m.datasz == 1 {
            return self.core.slice(m.seg, m.off, m.size);
        }
        None
    }

    /// Stores `text` into pointer slot `index` of `parent` as a terminated
    /// byte list. The terminator byte is written by the copy, not read from
    /// the caller's buffer.
    pub fn set_text(&mut self, parent: Ptr, index: u32, text: &str) -> Result<()> {
        let m = detached_bytes(text.len() as u64, true)?;
        self.write_ptr(Source::Bytes(text.as_bytes()), parent, index, m, 1)
    }

    /// Stores `bytes` into pointer slot `index` of `parent` as a byte list
    /// with no terminator.
    pub fn set_data(&mut self, parent: Ptr, index: u32, bytes: &[u8]) -> Result<()> {
        let m = detached_bytes(bytes.len() as u64, false)?;
        self.write_ptr(Source::Bytes(bytes), parent, index, m, 0)
    }
}
