//! Canonical vocabulary shared by the whole job-management subsystem.
//!
//! The persisted integer codes of all statuses are part of the store format and must not be
//! renumbered.
pub mod backend;
pub mod job;
pub mod session;
pub mod transfer;
