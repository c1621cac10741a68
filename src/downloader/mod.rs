pub mod chunk;
pub mod engine;
pub mod progress;
pub mod throttle;

pub use chunk::{
    is_single_component, merge_parts, sanitize_component, split_ranges, Chunk, ChunkEvent,
};
pub use engine::{
    DownloadEngine, DownloadHandle, DownloadHooks, DownloadRequest, DownloadSnapshot,
    DownloadSubmitter, EngineOptions, NoopHooks,
};
pub use progress::{Progress, ProgressTracker};
pub use throttle::{SpeedLimiter, READ_BUFFER_SIZE};
