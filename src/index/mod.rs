mod btree;
mod btree_iterator;
mod btree_page;
mod btree_verify;

pub use btree::*;
pub use btree_iterator::*;
pub use btree_verify::*;
