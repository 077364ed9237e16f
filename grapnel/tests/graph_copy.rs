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

//! Cross-message sub-graph copying: recursion collapse, sharing, overlap
//! rejection, the depth bound, and the struct-list element write.

use grapnel::{ErrorKind, HeapAllocator, Message, Ptr, PtrKind, SegmentRef, SegmentStore};

fn fresh() -> (Message<HeapAllocator>, Ptr, SegmentRef) {
    let mut msg = Message::new(HeapAllocator::new());
    let root = msg.new_root().unwrap();
    let seg = root.segment().unwrap();
    (msg, root, seg)
}

#[test]
fn deep_copy_carries_every_shape_across_messages() {
    let (mut a, root_a, seg_a) = fresh();
    let s = a.new_struct(seg_a, 16, 3).unwrap();
    a.write64(s, 0, 0x1111).unwrap();
    a.write32(s, 8, 0x2222).unwrap();
    a.set_text(s, 0, "carried").unwrap();

    let nums = a.new_list(seg_a, 4, 8, 0).unwrap();
    for i in 0..4 {
        a.set64(nums, i, 100 + i as u64).unwrap();
    }
    a.setp(s, 1, nums).unwrap();

    let bits = a.new_bit_list(seg_a, 10).unwrap();
    a.set1(bits, 3, true).unwrap();
    a.set1(bits, 9, true).unwrap();
    a.setp(s, 2, bits).unwrap();

    a.setp(root_a, 0, s).unwrap();
    let from = a.get_root();

    let (mut b, root_b, _) = fresh();
    b.setp_from(root_b, 0, &a, from).unwrap();

    let s2 = b.getp(root_b, 0);
    assert_eq!(s2.kind(), PtrKind::Struct);
    assert_eq!(b.read64(s2, 0), 0x1111);
    assert_eq!(b.read32(s2, 8), 0x2222);
    assert_eq!(b.get_text(s2, 0).unwrap(), b"carried");

    let nums2 = b.getp(s2, 1);
    assert_eq!(nums2.len(), 4);
    for i in 0..4 {
        assert_eq!(b.get64(nums2, i).unwrap(), 100 + i as u64);
    }

    let bits2 = b.getp(s2, 2);
    assert_eq!(bits2.kind(), PtrKind::BitList);
    assert!(b.get1(bits2, 3).unwrap());
    assert!(b.get1(bits2, 9).unwrap());
    assert!(!b.get1(bits2, 4).unwrap());
}

#[test]
fn composite_list_elements_copy_data_and_pointers() {
    let (mut a, root_a, seg_a) = fresh();
    let people = a.new_list(seg_a, 3, 8, 1).unwrap();
    for i in 0..3 {
        let elem = a.getp(people, i);
        a.write64(elem, 0, 1000 + i as u64).unwrap();
    }
    // Give one element a pointer so the walk has to recurse.
    let elem1 = a.getp(people, 1);
    a.set_text(elem1, 0, "middle").unwrap();
    a.setp(root_a, 0, people).unwrap();
    let from = a.get_root();

    let (mut b, root_b, _) = fresh();
    b.setp_from(root_b, 0, &a, from).unwrap();

    let people2 = b.getp(root_b, 0);
    assert_eq!(people2.kind(), PtrKind::List);
    assert_eq!(people2.len(), 3);
    for i in 0..3 {
        let elem = b.getp(people2, i);
        assert_eq!(b.read64(elem, 0), 1000 + i as u64);
    }
    let elem1 = b.getp(people2, 1);
    assert_eq!(b.get_text(elem1, 0).unwrap(), b"middle");
    let elem0 = b.getp(people2, 0);
    assert!(b.get_text(elem0, 0).is_none());
}

#[test]
fn cycle_in_the_source_closes_inside_the_destination() {
    let (mut a, root_a, seg_a) = fresh();
    let x = a.new_struct(seg_a, 8, 1).unwrap();
    a.write64(x, 0, 0xabba).unwrap();
    a.setp(x, 0, x).unwrap();
    a.setp(root_a, 0, x).unwrap();
    let from = a.get_root();

    let (mut b, root_b, _) = fresh();
    b.setp_from(root_b, 0, &a, from).unwrap();

    // Follow the cycle a few laps in the destination: same object each time.
    let first = b.getp(root_b, 0);
    let mut cur = first;
    for _ in 0..5 {
        assert_eq!(b.read64(cur, 0), 0xabba);
        cur = b.getp(cur, 0);
        assert_eq!(cur, first);
    }
}

#[test]
fn shared_subtree_is_not_duplicated() {
    let (mut a, root_a, seg_a) = fresh();
    let shared = a.new_struct(seg_a, 8, 0).unwrap();
    a.write64(shared, 0, 7).unwrap();
    let parent = a.new_struct(seg_a, 0, 2).unwrap();
    a.setp(parent, 0, shared).unwrap();
    a.setp(parent, 1, shared).unwrap();
    a.setp(root_a, 0, parent).unwrap();
    let from = a.get_root();

    let (mut b, root_b, _) = fresh();
    b.setp_from(root_b, 0, &a, from).unwrap();

    let parent2 = b.getp(root_b, 0);
    let left = b.getp(parent2, 0);
    let right = b.getp(parent2, 1);
    assert_eq!(left, right);
    assert_eq!(b.read64(left, 0), 7);
}

#[test]
fn overlapping_source_ranges_are_rejected() {
    // Hand-built segment: a root struct with two pointer slots whose targets
    // share bytes without being the same object.
    let words: Vec<u64> = vec![
        2u64 << 48,                    // root: struct, 0 data words, 2 ptrs
        (1 << 2) | (2u64 << 32),       // slot 0: struct at word 3, 2 data words
        (1 << 2) | (2u64 << 32),       // slot 1: struct at word 4, 2 data words
        0xaaaa_aaaa,
        0xbbbb_bbbb,
        0xcccc_cccc,
    ];
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let mut a = Message::new(SegmentStore::new(vec![bytes]));
    let root_struct = a.get_root();
    assert_eq!(root_struct.kind(), PtrKind::Struct);

    let (mut b, root_b, _) = fresh();
    assert_eq!(
        b.setp_from(root_b, 0, &a, root_struct).unwrap_err().kind,
        ErrorKind::OverlappingCopySource
    );
}

#[test]
fn copy_depth_is_bounded() {
    let (mut a, root_a, seg_a) = fresh();
    let nodes: Vec<Ptr> = (0..40)
        .map(|_| a.new_struct(seg_a, 0, 1).unwrap())
        .collect();
    for pair in nodes.windows(2) {
        a.setp(pair[0], 0, pair[1]).unwrap();
    }
    a.setp(root_a, 0, nodes[0]).unwrap();

    let (mut b, root_b, _) = fresh();
    assert_eq!(
        b.setp_from(root_b, 0, &a, nodes[0]).unwrap_err().kind,
        ErrorKind::CopyDepthLimitExceeded
    );

    // A chain comfortably under the bound copies fine.
    let (mut c, root_c, seg_c) = fresh();
    let short: Vec<Ptr> = (0..10)
        .map(|_| c.new_struct(seg_c, 8, 1).unwrap())
        .collect();
    for pair in short.windows(2) {
        c.setp(pair[0], 0, pair[1]).unwrap();
    }
    c.write64(short[9], 0, 0x5afe).unwrap();
    c.setp(root_c, 0, short[0]).unwrap();

    let (mut d, root_d, _) = fresh();
    d.setp_from(root_d, 0, &c, short[0]).unwrap();
    let mut cur = d.getp(root_d, 0);
    for _ in 0..9 {
        cur = d.getp(cur, 0);
    }
    assert_eq!(d.read64(cur, 0), 0x5afe);
}

#[test]
fn struct_write_into_struct_list_truncates_to_the_element_shape() {
    let (mut a, root_a, seg_a) = fresh();
    // Elements hold one data word and one pointer; the source struct is
    // wider on both sections.
    let list = a.new_list(seg_a, 2, 8, 1).unwrap();
    a.setp(root_a, 0, list).unwrap();

    let wide = a.new_struct(seg_a, 16, 2).unwrap();
    a.write64(wide, 0, 0x0101).unwrap();
    a.write64(wide, 8, 0x0202).unwrap();
    a.set_text(wide, 0, "kept").unwrap();
    a.set_text(wide, 1, "dropped").unwrap();

    a.setp(list, 0, wide).unwrap();

    let elem = a.getp(list, 0);
    assert_eq!(a.read64(elem, 0), 0x0101);
    // The second data word did not fit the element.
    assert_eq!(a.read64(elem, 8), 0);
    assert_eq!(a.get_text(elem, 0).unwrap(), b"kept");
    assert!(a.getp(elem, 1).is_null());

    // Only struct sources are accepted by the element write.
    let nums = a.new_list(seg_a, 1, 8, 0).unwrap();
    assert_eq!(
        a.setp(list, 1, nums).unwrap_err().kind,
        ErrorKind::NotAPointerField
    );
}

#[test]
fn list_member_targets_are_copied_not_referenced() {
    let (mut a, root_a, seg_a) = fresh();
    let list = a.new_list(seg_a, 2, 8, 0).unwrap();
    a.setp(root_a, 0, list).unwrap();
    let member = a.getp(list, 0);
    a.write64(member, 0, 0xd00d).unwrap();

    // Installing a member into a struct slot must clone its bytes.
    let holder = a.new_struct(seg_a, 0, 1).unwrap();
    a.setp(holder, 0, member).unwrap();
    let copied = a.getp(holder, 0);
    assert_eq!(a.read64(copied, 0), 0xd00d);
    assert_ne!(copied, member);
    // Mutating the original list member does not touch the copy.
    a.write64(member, 0, 0x0bad).unwrap();
    assert_eq!(a.read64(copied, 0), 0xd00d);
}

#[test]
fn copy_into_a_refusing_destination_fails_cleanly() {
    let (mut a, _, seg_a) = fresh();
    let s = a.new_struct(seg_a, 8, 0).unwrap();

    // The destination's host can satisfy the root slot but nothing more.
    let mut b = Message::new(SegmentStore::new(vec![vec![0u8; 8]]));
    let root_b = b.new_root().unwrap();
    assert_eq!(
        b.setp_from(root_b, 0, &a, s).unwrap_err().kind,
        ErrorKind::AllocationRefused
    );
    // The message stays readable and the slot stays null.
    assert!(b.get_root().is_null());
}
