pub mod kv;
pub mod process;
pub mod results;

pub use kv::{is_empty_sentinel, empty_sentinel, BlobCache, DiskKvCache, MemoryKvCache};
pub use process::ProcessCache;
pub use results::{ResultsStore, StoredBundle, StoredLlmOutput};
