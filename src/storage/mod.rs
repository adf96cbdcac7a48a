/// Storage adapters
///
/// Both backends implement `WorkflowStore` and `ExecutionLedger`:
/// - `MemoryStore`: process-local, used by tests and the `memory` database mode
/// - `SqliteStore`: sqlx SQLite with JSON documents and upserts

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
