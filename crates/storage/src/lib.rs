pub mod history;
pub mod memory;

pub use history::SqliteHistoryStore;
pub use memory::InMemoryHistoryStore;
