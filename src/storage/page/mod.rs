mod page_manager;
mod root_table;

pub use page_manager::*;
pub use root_table::*;
