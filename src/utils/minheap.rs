use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub struct MinHeap<T: Ord>(BinaryHeap<Reverse<T>>);

impl<T: Ord> MinHeap<T> {
  pub fn new() -> Self {
    MinHeap(BinaryHeap::<Reverse<T>>::new())
  }

  pub fn push(&mut self, item: T) {
    self.0.push(Reverse(item));
  }

  pub fn pop(&mut self) -> Option<T> {
    self.0.pop().map(|v| v.0)
  }
}

impl<T: Ord> Default for MinHeap<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl MinHeap<usize> {
  /// Drains the heap and returns the smallest number not in it.
  pub fn find_smallest_absent(&mut self) -> usize {
    let mut i = 0;
    while let Some(v) = self.pop() {
      if v < i {
        // duplicate
        continue;
      }
      if v != i {
        return i;
      }
      i += 1;
    }
    i
  }
}
