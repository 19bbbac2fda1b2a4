/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Augmented red-black interval tree. Nodes live in an arena and carry
//! `[low, high]` plus the subtree's maximum high for overlap pruning.
//! Enumeration visits overlapping nodes in key order, which keeps the
//! optimizer deterministic.

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug)]
struct Node<T> {
    low: i64,
    high: i64,
    max_high: i64,
    data: T,
    color: Color,
    left: usize,
    right: usize,
    parent: usize,
}

#[derive(Debug)]
pub struct IntervalTree<T> {
    nodes: Vec<Node<T>>,
    root: usize,
}

impl<T> Default for IntervalTree<T> {
    fn default() -> Self {
        IntervalTree {
            nodes: Vec::new(),
            root: NIL,
        }
    }
}

impl<T> IntervalTree<T> {
    pub fn new() -> Self {
        IntervalTree::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_max_high(&self, n: usize) -> i64 {
        if n == NIL { i64::MIN } else { self.nodes[n].max_high }
    }

    fn recompute_max_high(&mut self, n: usize) {
        let left = self.nodes[n].left;
        let right = self.nodes[n].right;
        let m = self.nodes[n]
            .high
            .max(self.node_max_high(left))
            .max(self.node_max_high(right));
        self.nodes[n].max_high = m;
    }

    fn rotate_left(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if self.nodes[xp].left == x {
            self.nodes[xp].left = y;
        } else {
            self.nodes[xp].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
        self.recompute_max_high(x);
        self.recompute_max_high(y);
    }

    fn rotate_right(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }
        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if self.nodes[xp].right == x {
            self.nodes[xp].right = y;
        } else {
            self.nodes[xp].left = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
        self.recompute_max_high(x);
        self.recompute_max_high(y);
    }

    pub fn insert(&mut self, low: i64, high: i64, data: T) {
        debug_assert!(low <= high);
        let z = self.nodes.len();
        self.nodes.push(Node {
            low,
            high,
            max_high: high,
            data,
            color: Color::Red,
            left: NIL,
            right: NIL,
            parent: NIL,
        });

        // Plain BST insert keyed on (low, high).
        let mut parent = NIL;
        let mut cur = self.root;
        while cur != NIL {
            parent = cur;
            let less = (low, high) < (self.nodes[cur].low, self.nodes[cur].high);
            cur = if less {
                self.nodes[cur].left
            } else {
                self.nodes[cur].right
            };
        }
        self.nodes[z].parent = parent;
        if parent == NIL {
            self.root = z;
        } else if (low, high) < (self.nodes[parent].low, self.nodes[parent].high) {
            self.nodes[parent].left = z;
        } else {
            self.nodes[parent].right = z;
        }

        // Push the new high up the ancestor chain.
        let mut up = parent;
        while up != NIL {
            if self.nodes[up].max_high >= high {
                break;
            }
            self.nodes[up].max_high = high;
            up = self.nodes[up].parent;
        }

        self.insert_fixup(z);
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while z != self.root && self.nodes[self.nodes[z].parent].color == Color::Red {
            let zp = self.nodes[z].parent;
            let zpp = self.nodes[zp].parent;
            if self.nodes[zpp].left == zp {
                let uncle = self.nodes[zpp].right;
                if uncle != NIL && self.nodes[uncle].color == Color::Red {
                    self.nodes[zp].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[zpp].color = Color::Red;
                    z = zpp;
                } else {
                    if self.nodes[zp].right == z {
                        z = zp;
                        self.rotate_left(z);
                    }
                    let zp = self.nodes[z].parent;
                    let zpp = self.nodes[zp].parent;
                    self.nodes[zp].color = Color::Black;
                    self.nodes[zpp].color = Color::Red;
                    self.rotate_right(zpp);
                }
            } else {
                let uncle = self.nodes[zpp].left;
                if uncle != NIL && self.nodes[uncle].color == Color::Red {
                    self.nodes[zp].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[zpp].color = Color::Red;
                    z = zpp;
                } else {
                    if self.nodes[zp].left == z {
                        z = zp;
                        self.rotate_right(z);
                    }
                    let zp = self.nodes[z].parent;
                    let zpp = self.nodes[zp].parent;
                    self.nodes[zp].color = Color::Black;
                    self.nodes[zpp].color = Color::Red;
                    self.rotate_left(zpp);
                }
            }
        }
        let root = self.root;
        self.nodes[root].color = Color::Black;
    }

    /// Visits every stored interval overlapping `[low, high]`, in key
    /// order.
    pub fn enumerate(&self, low: i64, high: i64, visit: &mut dyn FnMut(&T)) {
        self.enumerate_node(self.root, low, high, visit);
    }

    fn enumerate_node(&self, n: usize, low: i64, high: i64, visit: &mut dyn FnMut(&T)) {
        if n == NIL || self.nodes[n].max_high < low {
            return;
        }
        let node = &self.nodes[n];
        self.enumerate_node(node.left, low, high, visit);
        if node.low <= high && node.high >= low {
            visit(&node.data);
        }
        // Right-subtree lows only grow; past the query they cannot
        // overlap.
        if node.low <= high {
            self.enumerate_node(node.right, low, high, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(tree: &IntervalTree<u32>, low: i64, high: i64) -> Vec<u32> {
        let mut out = Vec::new();
        tree.enumerate(low, high, &mut |&d| out.push(d));
        out
    }

    #[test]
    fn test_basic_overlap() {
        let mut t = IntervalTree::new();
        t.insert(1, 5, 0);
        t.insert(3, 9, 1);
        t.insert(10, 12, 2);
        assert_eq!(collect(&t, 4, 4), vec![0, 1]);
        assert_eq!(collect(&t, 9, 11), vec![1, 2]);
        assert_eq!(collect(&t, 13, 20), Vec::<u32>::new());
    }

    #[test]
    fn test_point_queries_on_boundaries() {
        let mut t = IntervalTree::new();
        t.insert(2, 6, 7);
        assert_eq!(collect(&t, 2, 2), vec![7]);
        assert_eq!(collect(&t, 6, 6), vec![7]);
        assert_eq!(collect(&t, 1, 1), Vec::<u32>::new());
        assert_eq!(collect(&t, 7, 7), Vec::<u32>::new());
    }

    #[test]
    fn test_enumeration_is_key_ordered() {
        let mut t = IntervalTree::new();
        // Insert out of order; enumeration sorts by (low, high).
        t.insert(30, 40, 3);
        t.insert(10, 50, 1);
        t.insert(20, 25, 2);
        t.insert(5, 100, 0);
        assert_eq!(collect(&t, 0, 100), vec![0, 1, 2, 3]);
        assert_eq!(collect(&t, 22, 32), vec![0, 1, 2, 3]);
        assert_eq!(collect(&t, 45, 60), vec![0, 1]);
    }

    #[test]
    fn test_many_sequential_inserts_stay_searchable() {
        let mut t = IntervalTree::new();
        for i in 0..200i64 {
            t.insert(i, i + 10, i as u32);
        }
        // Point 50 overlaps [40..=50].
        let hits = collect(&t, 50, 50);
        assert_eq!(hits, (40..=50).map(|i| i as u32).collect::<Vec<_>>());
        assert_eq!(t.len(), 200);
    }

    #[test]
    fn test_duplicate_intervals() {
        let mut t = IntervalTree::new();
        t.insert(4, 8, 0);
        t.insert(4, 8, 1);
        assert_eq!(collect(&t, 5, 5).len(), 2);
    }
}
