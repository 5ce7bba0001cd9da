pub mod loader;
pub mod schema;
pub mod transaction;

pub use loader::{batch_insert, TableRow, DEFAULT_BATCH_SIZE};
pub use schema::{export_database, import_database, initialize, open, open_in_memory, TableCounts};
pub use transaction::ScopedTransaction;
