//! Access to the relational store that holds all persisted entities.
//!
//! Every value that ends up in a statement is bound as a positional parameter (`?1`, `?2`, ...).
//! [`GatewayConnection::escape_literal`] exists only for callers that have to produce SQL text for
//! other tools, it is never used to build statements executed through the gateway.
use std::sync::Arc;

mod error;
pub mod schema;
mod sqlite;
mod value;

pub use error::{GatewayError, GatewayResult};
pub use sqlite::SqliteGateway;
pub use value::{QueryResult, RowRef, SqlValue, Statement};

/// A scoped handle to the store.
///
/// The handle is released when it is dropped. A transaction that was started and neither
/// committed nor rolled back is rolled back on drop.
pub trait GatewayConnection {
    /// Executes a statement and returns the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> GatewayResult<usize>;

    fn query(&mut self, statement: &Statement) -> GatewayResult<QueryResult>;

    fn escape_literal(&self, value: &str) -> String;

    fn begin_transaction(&mut self) -> GatewayResult<()>;
    fn commit(&mut self) -> GatewayResult<()>;
    fn rollback(&mut self) -> GatewayResult<()>;
}

pub trait PersistenceGateway: Send + Sync {
    fn acquire(&self) -> GatewayResult<Box<dyn GatewayConnection + '_>>;
}

impl<T: PersistenceGateway + ?Sized> PersistenceGateway for Arc<T> {
    fn acquire(&self) -> GatewayResult<Box<dyn GatewayConnection + '_>> {
        (**self).acquire()
    }
}

/// Quotes a string as an SQL literal.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
