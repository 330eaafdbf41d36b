mod snapshot;
mod transaction;
mod transaction_manager;
mod write_gate;

pub use snapshot::*;
pub use transaction::*;
pub use transaction_manager::*;
pub use write_gate::*;
