pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod setup;
pub mod signal;
pub mod utils;
