pub mod engine;
pub mod response;

// Re-exports for convenience
pub use engine::{HttpEngine, PooledHttpEngine, UpgradeExchange};
pub use response::HttpResponse;
