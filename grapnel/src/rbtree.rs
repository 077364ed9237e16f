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

//! Intrusive red-black tree over arena indices.
//!
//! Nodes are embedded in arena entries and reference each other by index
//! rather than by pointer, so the same rebalance routine serves both the
//! segment registry and the copy tree. Callers perform the ordinary binary
//! search tree descent themselves, link the fresh node under its parent, and
//! then hand the tree to [`insert_rebalance`] for the fixup.

/// Sentinel index standing in for an absent node.
pub(crate) const NIL: u32 = !0;

/// Link block embedded in every tree entry.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Node {
    pub parent: u32,
    pub link: [u32; 2],
    pub red: bool,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            parent: NIL,
            link: [NIL, NIL],
            red: false,
        }
    }
}

/// Arena access used by the rebalance routine.
pub(crate) trait Links {
    fn node(&self, idx: u32) -> &Node;
    fn node_mut(&mut self, idx: u32) -> &mut Node;
}

/// Restores the red-black invariants after `n` has been linked under its
/// parent as a leaf, returning the possibly-changed root.
///
/// The node's own links are reset here; its `parent` field and the parent's
/// child link must already be in place.
pub(crate) fn insert_rebalance<L: Links>(arena: &mut L, mut root: u32, mut n: u32) -> u32 {
    {
        let node = arena.node_mut(n);
        node.red = true;
        node.link = [NIL, NIL];
    }

    loop {
        // Case 1: n is root.
        let p = arena.node(n).parent;
        if p == NIL {
            arena.node_mut(n).red = false;
            root = n;
            break;
        }

        // Case 2: parent is black.
        if !arena.node(p).red {
            break;
        }

        // Parent is red, so it cannot be the root and the grandparent exists.
        let g = arena.node(p).parent;
        let dir = (arena.node(g).link[1] == p) as usize;

        // Case 3: parent and uncle are red. Recolor and continue from the
        // grandparent, which may itself be the root or have a red parent.
        let u = arena.node(g).link[1 - dir];
        if u != NIL && arena.node(u).red {
            arena.node_mut(p).red = false;
            arena.node_mut(u).red = false;
            arena.node_mut(g).red = true;
            n = g;
            continue;
        }

        let gg = arena.node(g).parent;
        let ndir = (arena.node(p).link[1] == n) as usize;
        let top;

        if dir != ndir {
            // Case 4: zig-zag. Rotate n above p, then above g.
            let two = arena.node(n).link[dir];
            let three = arena.node(n).link[1 - dir];
            arena.node_mut(p).link[1 - dir] = two;
            arena.node_mut(g).link[dir] = three;
            {
                let node = arena.node_mut(n);
                node.link[dir] = p;
                node.link[1 - dir] = g;
                node.parent = gg;
                node.red = false;
            }
            arena.node_mut(p).parent = n;
            arena.node_mut(g).parent = n;
            if two != NIL {
                arena.node_mut(two).parent = p;
            }
            if three != NIL {
                arena.node_mut(three).parent = g;
            }
            arena.node_mut(g).red = true;
            top = n;
        } else {
            // Case 5: zig. Rotate p above g.
            let three = arena.node(p).link[1 - dir];
            arena.node_mut(g).link[dir] = three;
            {
                let node = arena.node_mut(p);
                node.link[1 - dir] = g;
                node.parent = gg;
                node.red = false;
            }
            arena.node_mut(g).parent = p;
            if three != NIL {
                arena.node_mut(three).parent = g;
            }
            arena.node_mut(g).red = true;
            top = p;
        }

        if gg == NIL {
            root = top;
        } else if arena.node(gg).link[1] == g {
            arena.node_mut(gg).link[1] = top;
        } else {
            arena.node_mut(gg).link[0] = top;
        }
        break;
    }

    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    impl Links for Vec<(u32, Node)> {
        fn node(&self, idx: u32) -> &Node {
            &self[idx as usize].1
        }
        fn node_mut(&mut self, idx: u32) -> &mut Node {
            &mut self[idx as usize].1
        }
    }

    fn insert(arena: &mut Vec<(u32, Node)>, root: u32, key: u32) -> u32 {
        let idx = arena.len() as u32;
        arena.push((key, Node::default()));
        let mut parent = NIL;
        let mut dir = 0;
        let mut x = root;
        while x != NIL {
            parent = x;
            dir = (key > arena[x as usize].0) as usize;
            x = arena[x as usize].1.link[dir];
        }
        arena[idx as usize].1.parent = parent;
        if parent != NIL {
            arena[parent as usize].1.link[dir] = idx;
        }
        insert_rebalance(arena, root, idx)
    }

    fn inorder(arena: &Vec<(u32, Node)>, x: u32, out: &mut Vec<u32>) {
        if x == NIL {
            return;
        }
        inorder(arena, arena[x as usize].1.link[0], out);
        out.push(arena[x as usize].0);
        inorder(arena, arena[x as usize].1.link[1], out);
    }

    /// Returns the black height, verifying no red node has a red child and
    /// every path carries the same number of black nodes.
    fn check(arena: &Vec<(u32, Node)>, x: u32) -> usize {
        if x == NIL {
            return 1;
        }
        let node = &arena[x as usize].1;
        if node.red {
            for child in node.link {
                assert!(child == NIL || !arena[child as usize].1.red);
            }
        }
        let lh = check(arena, node.link[0]);
        let rh = check(arena, node.link[1]);
        assert_eq!(lh, rh);
        lh + usize::from(!node.red)
    }

    #[test]
    fn ascending_insertion_stays_balanced() {
        let mut arena = Vec::new();
        let mut root = NIL;
        for key in 0..64 {
            root = insert(&mut arena, root, key);
        }
        assert!(!arena[root as usize].1.red);
        check(&arena, root);
        let mut keys = Vec::new();
        inorder(&arena, root, &mut keys);
        assert_eq!(keys, (0..64).collect::<Vec<u32>>());
    }

    #[test]
    fn shuffled_insertion_stays_balanced() {
        // Fixed permutation covering the zig and zig-zag cases.
        let order = [13, 2, 29, 7, 31, 0, 17, 23, 5, 11, 3, 19, 27, 9, 21, 15, 25, 1];
        let mut arena = Vec::new();
        let mut root = NIL;
        for &key in &order {
            root = insert(&mut arena, root, key);
        }
        assert!(!arena[root as usize].1.red);
        check(&arena, root);
        let mut keys = Vec::new();
        inorder(&arena, root, &mut keys);
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }
}
