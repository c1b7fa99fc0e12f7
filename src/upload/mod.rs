mod chunked;
mod engine;
pub mod memory;
pub mod record;
pub mod retry;
pub mod storage;
#[cfg(test)]
mod tests;

pub use chunked::ChunkedUploader;
pub use engine::{UploadEngine, UploadOptions, UploadResult};
pub use memory::{MemoryObjectStorage, MemoryRecordStore};
pub use record::{
    ChunkSummary, CompletionTransaction, FsRecordStore, RecordPatch, RecordStatus,
    RemoteSessionRecord, SessionRecordStore,
};
pub use retry::{commit_with_cleanup, retry_with_backoff, BackoffPolicy, CommitFailure, RetryError};
pub use storage::{FsObjectStorage, ObjectStorage};
