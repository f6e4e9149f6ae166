pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::StoreConfig;
pub use error::BeamError;
