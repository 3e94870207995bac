//! Dispatch core: the claim/execute/commit loop, the per-cycle init block
//! cache, and the batch-completion summarizer.

pub mod dispatcher;
pub mod init_cache;
pub mod summarizer;
pub mod types;

pub use dispatcher::Dispatcher;
pub use init_cache::InitBlockCache;
pub use summarizer::BatchSummarizer;
pub use types::{
    BatchOutcome, BatchProcessor, CycleOutcome, InitBlock, Initializer, SlowQueryOutcome,
    SlowQueryProcessor,
};
