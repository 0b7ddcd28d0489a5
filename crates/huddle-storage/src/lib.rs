pub mod blob;
pub mod error;
pub mod fs;
pub mod history;
pub mod memory;
pub mod paths;
pub mod registry;
pub mod retry;

pub use blob::BlobStore;
pub use error::{Result, StorageError};
pub use fs::FsBlobStore;
pub use history::HistoryStore;
pub use memory::MemoryBlobStore;
pub use registry::RegistryStore;
