//! Binary encodings for B-tree node pages and document values.

pub mod node;
mod value;

pub use node::{InternalNode, LeafNode, Node};
pub use value::*;
