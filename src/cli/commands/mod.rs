//! CLI command implementations

pub mod cache;
pub mod config;
pub mod workspace;

pub use cache::execute as cache;
pub use config::execute as config;
pub use workspace::execute as workspace;
