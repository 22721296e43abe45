//! CLI command implementations

pub mod blob;
pub mod config;
pub mod registry;
pub mod store;

pub use blob::execute as blob;
pub use config::execute as config;
pub use registry::execute as registry;
pub use store::execute as store;
