//! Persistence for tasks, issues, the task graph and run metadata.
//!
//! Stage outputs live as JSON documents under `<work_dir>/<state_dir>`.
//! Components talk to the `StateStore` trait so tests can swap in the
//! in-memory store.

mod file;
mod memory;
mod store;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use store::{StateStore, DEFAULT_STATE_DIR};
