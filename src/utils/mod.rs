mod graph;
pub use graph::Graph;
mod minheap;
pub use minheap::MinHeap;
