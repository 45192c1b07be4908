pub mod adapters;
pub mod headers;
pub mod manager;
pub mod pacer;
pub mod retry;

pub use adapters::*;
pub use manager::{FetcherManager, ManagerConfig};
pub use pacer::Pacer;
pub use retry::RetryPolicy;
