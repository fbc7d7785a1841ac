pub(crate) mod data_structures;
pub mod error;
pub mod macros;

pub use data_structures::{Map, Set};
