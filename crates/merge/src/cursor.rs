//! K-way merging cursor over per-file cursors.
//!
//! A binary heap of file indices orders the per-file cursors by their
//! current key, with the file's position in the snapshot breaking ties:
//! lower index means newer file, and the newer version of a key shadows the
//! older ones. The heap compares in either direction, so the same structure
//! drives forward and reverse iteration.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use sstable::{FileCursor, FindResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Order {
    Forward,
    Reverse,
}

impl Order {
    fn apply(self, o: Ordering) -> Ordering {
        match self {
            Order::Forward => o,
            Order::Reverse => o.reverse(),
        }
    }
}

/// Merges the entries of many sorted files into one ordered stream.
///
/// Tombstones are surfaced, not skipped; compaction needs to see them and
/// the database cursor filters them out one layer up. The iteration
/// direction is established by [`first`](MergeCursor::first),
/// [`last`](MergeCursor::last), or [`find`](MergeCursor::find) (forward);
/// stepping against the established direction is an error.
pub struct MergeCursor {
    cursors: Vec<FileCursor>,
    /// Heap of indices into `cursors`; `heap[0]` is the current entry.
    heap: Vec<usize>,
    order: Order,
    /// Scratch copy of the last returned key, used while advancing
    /// shadowed duplicates.
    key: Vec<u8>,
}

impl MergeCursor {
    pub(crate) fn new(cursors: Vec<FileCursor>) -> Self {
        Self {
            cursors,
            heap: Vec::new(),
            order: Order::Forward,
            key: Vec::new(),
        }
    }

    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.cursors[self.heap[0]].key()
    }

    /// Value of the current entry. Empty for tombstones.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        self.cursors[self.heap[0]].value()
    }

    /// Whether the current entry is a deletion marker.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn tombstone(&self) -> bool {
        self.cursors[self.heap[0]].tombstone()
    }

    /// Positions at the smallest key across all files.
    pub fn first(&mut self) -> Result<bool> {
        self.rewind(Order::Forward)
    }

    /// Positions at the largest key across all files.
    pub fn last(&mut self) -> Result<bool> {
        self.rewind(Order::Reverse)
    }

    fn rewind(&mut self, order: Order) -> Result<bool> {
        self.order = order;
        self.heap.clear();
        for (i, cur) in self.cursors.iter_mut().enumerate() {
            let positioned = match order {
                Order::Forward => cur.first()?,
                Order::Reverse => cur.last()?,
            };
            if positioned {
                self.heap.push(i);
            }
        }
        heapify(&mut self.heap, &self.cursors, order);
        Ok(!self.heap.is_empty())
    }

    /// Steps to the next larger merged key, skipping older versions of the
    /// key just visited.
    pub fn next(&mut self) -> Result<bool> {
        self.step(Order::Forward)
    }

    /// Steps to the next smaller merged key.
    pub fn previous(&mut self) -> Result<bool> {
        self.step(Order::Reverse)
    }

    fn step(&mut self, dir: Order) -> Result<bool> {
        if self.heap.is_empty() {
            return Ok(false);
        }
        if dir != self.order {
            bail!("merge cursor direction changed without repositioning");
        }

        self.key.clear();
        self.key.extend_from_slice(self.cursors[self.heap[0]].key());

        // Advance the top cursor, then keep advancing whichever cursor
        // surfaces while its key is still <= the key we just returned:
        // those are older, shadowed versions of the same key.
        loop {
            let idx = self.heap[0];
            let cur = &mut self.cursors[idx];
            let positioned = match dir {
                Order::Forward => cur.next()?,
                Order::Reverse => cur.previous()?,
            };
            if positioned {
                sift_down(&mut self.heap, &self.cursors, self.order, 0);
                if self.heap[0] == idx {
                    // The advanced cursor still owns the smallest key, so
                    // no other cursor can be sitting on the returned key.
                    break;
                }
            } else {
                pop(&mut self.heap, &self.cursors, self.order);
                if self.heap.is_empty() {
                    return Ok(false);
                }
            }
            let top = self.cursors[self.heap[0]].key();
            if self.order.apply(top.cmp(&self.key)) == Ordering::Greater {
                break;
            }
        }
        Ok(true)
    }

    /// Positions every file cursor at `key` (or its successor) and reports
    /// the merged outcome. Establishes forward iteration order.
    pub fn find(&mut self, key: &[u8]) -> Result<FindResult> {
        self.order = Order::Forward;
        self.heap.clear();
        for (i, cur) in self.cursors.iter_mut().enumerate() {
            if cur.find(key)?.any() {
                self.heap.push(i);
            }
        }
        heapify(&mut self.heap, &self.cursors, self.order);
        if self.heap.is_empty() {
            return Ok(FindResult::NotFound);
        }
        if self.cursors[self.heap[0]].key() == key {
            Ok(FindResult::Found)
        } else {
            Ok(FindResult::FoundGreater)
        }
    }
}

// Heap primitives over indices into the cursor list. Free functions so the
// heap vector and the cursors can be borrowed independently.

fn less(cursors: &[FileCursor], order: Order, a: usize, b: usize) -> bool {
    match order.apply(cursors[a].key().cmp(cursors[b].key())) {
        Ordering::Less => true,
        Ordering::Greater => false,
        // Equal keys: the newer file (lower snapshot index) wins.
        Ordering::Equal => a < b,
    }
}

fn heapify(heap: &mut [usize], cursors: &[FileCursor], order: Order) {
    let n = heap.len();
    for i in (0..n / 2).rev() {
        sift_down(heap, cursors, order, i);
    }
}

fn sift_down(heap: &mut [usize], cursors: &[FileCursor], order: Order, at: usize) {
    let n = heap.len();
    let mut i = at;
    loop {
        let left = 2 * i + 1;
        if left >= n {
            break;
        }
        let mut child = left;
        let right = left + 1;
        if right < n && less(cursors, order, heap[right], heap[left]) {
            child = right;
        }
        if !less(cursors, order, heap[child], heap[i]) {
            break;
        }
        heap.swap(i, child);
        i = child;
    }
}

fn pop(heap: &mut Vec<usize>, cursors: &[FileCursor], order: Order) {
    let n = heap.len() - 1;
    heap.swap(0, n);
    heap.truncate(n);
    if !heap.is_empty() {
        sift_down(heap, cursors, order, 0);
    }
}
