//! SSA construction: dominators, mem2reg and the checks that go with them.
pub mod dom_tree;
pub mod mem2reg;
pub mod verify;

pub use dom_tree::DomTree;
pub use mem2reg::{promote, PromotionStats};
