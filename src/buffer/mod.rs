mod lru_k_replacer;
mod page_cache;

pub use lru_k_replacer::*;
pub use page_cache::*;
