pub mod backend;
pub mod config;
pub mod manager;
pub mod queue;
pub mod testing;
pub mod trackers;

pub use backend::{
    Aria2Backend, Backend, BackendError, GlobalStats, QbBackend, RetryPolicy, RetryingBackend,
    Transfer, TransferFile, TransferStatus,
};
pub use config::{
    load_config, load_config_from_str, Aria2Config, Config, ConfigError, QbConfig, QueueConfig,
    TrackerConfig,
};
pub use manager::{
    is_metadata_only, transfer_name, BackendKind, Speeds, TransferError, TransferManager,
    METADATA_PREFIX,
};
pub use queue::{Admission, Direction, QueueCounts, QueueManager, Task, TaskId, TaskStatus};
pub use trackers::{spawn_refresh_loop, TrackerRefresher};
