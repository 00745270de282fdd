pub mod config;
pub mod models;
pub mod notify;
pub mod poller;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod subscriptions;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
