mod disk_manager;
mod page_io;

pub use disk_manager::*;
pub use page_io::*;
