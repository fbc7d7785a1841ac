pub mod backend;
pub mod common;
pub mod monitor;
pub mod session;
pub mod submission;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::BatchmonError;
pub type Result<T> = std::result::Result<T, Error>;

pub const BATCHMON_VERSION: &str = env!("CARGO_PKG_VERSION");

// Reexports
pub use batchcore;
