pub mod common;
pub mod gateway;
pub mod model;

pub use crate::common::{Map, Set};
pub use crate::model::backend::{BackendDescriptor, BackendType};
pub use crate::model::job::{JobId, JobRecord, JobStatus};
pub use crate::model::session::{SessionId, SessionRecord, SessionState};
pub use crate::model::transfer::{FileTransferRecord, TransferId, TransferStatus};

pub type Error = common::error::CoreError;
pub type Result<T> = std::result::Result<T, Error>;
