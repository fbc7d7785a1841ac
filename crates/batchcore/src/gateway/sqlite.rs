use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql, params_from_iter};

use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::value::{QueryResult, SqlValue, Statement};
use crate::gateway::{GatewayConnection, PersistenceGateway, quote_literal, schema};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

/// Gateway backed by a single SQLite connection.
///
/// All handles share the connection, acquiring a handle locks it until the handle is dropped.
pub struct SqliteGateway {
    connection: Mutex<Connection>,
}

impl SqliteGateway {
    pub fn open(path: &Path) -> GatewayResult<Self> {
        let connection =
            Connection::open(path).map_err(|e| GatewayError::Connection(e.to_string()))?;
        connection
            .busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        log::debug!("Opened database {}", path.display());
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> GatewayResult<Self> {
        let connection =
            Connection::open_in_memory().map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Creates the tables used by the job-management subsystem if they do not exist yet.
    pub fn create_schema(&self) -> GatewayResult<()> {
        let connection = self.lock()?;
        connection
            .execute_batch(schema::SCHEMA)
            .map_err(|e| map_error(schema::SCHEMA, e))
    }

    fn lock(&self) -> GatewayResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| GatewayError::Connection("database handle is poisoned".to_string()))
    }
}

impl PersistenceGateway for SqliteGateway {
    fn acquire(&self) -> GatewayResult<Box<dyn GatewayConnection + '_>> {
        Ok(Box::new(SqliteHandle {
            connection: self.lock()?,
            in_transaction: false,
        }))
    }
}

struct SqliteHandle<'a> {
    connection: MutexGuard<'a, Connection>,
    in_transaction: bool,
}

impl GatewayConnection for SqliteHandle<'_> {
    fn execute(&mut self, statement: &Statement) -> GatewayResult<usize> {
        log::trace!("Executing {} {:?}", statement.sql(), statement.params());
        self.connection
            .execute(statement.sql(), params_from_iter(statement.params()))
            .map_err(|e| map_error(statement.sql(), e))
    }

    fn query(&mut self, statement: &Statement) -> GatewayResult<QueryResult> {
        log::trace!("Querying {} {:?}", statement.sql(), statement.params());
        let sql = statement.sql();
        let mut prepared = self
            .connection
            .prepare(sql)
            .map_err(|e| map_error(sql, e))?;
        let columns: Vec<String> = prepared
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let column_count = columns.len();

        let mut rows = prepared
            .query(params_from_iter(statement.params()))
            .map_err(|e| map_error(sql, e))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(|e| map_error(sql, e))? {
            let mut record = Vec::with_capacity(column_count);
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index).map_err(|e| map_error(sql, e))?;
                record.push(decode_value(column, value)?);
            }
            values.push(record);
        }
        Ok(QueryResult::new(columns, values))
    }

    fn escape_literal(&self, value: &str) -> String {
        quote_literal(value)
    }

    fn begin_transaction(&mut self) -> GatewayResult<()> {
        if self.in_transaction {
            return Err(GatewayError::Transaction(
                "transaction already started".to_string(),
            ));
        }
        self.connection
            .execute_batch("BEGIN")
            .map_err(|e| GatewayError::Transaction(e.to_string()))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> GatewayResult<()> {
        if !self.in_transaction {
            return Err(GatewayError::Transaction("no active transaction".to_string()));
        }
        self.in_transaction = false;
        self.connection
            .execute_batch("COMMIT")
            .map_err(|e| GatewayError::Transaction(e.to_string()))
    }

    fn rollback(&mut self) -> GatewayResult<()> {
        if !self.in_transaction {
            return Err(GatewayError::Transaction("no active transaction".to_string()));
        }
        self.in_transaction = false;
        self.connection
            .execute_batch("ROLLBACK")
            .map_err(|e| GatewayError::Transaction(e.to_string()))
    }
}

impl Drop for SqliteHandle<'_> {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(error) = self.connection.execute_batch("ROLLBACK") {
                log::error!("Rollback of an unfinished transaction failed: {error}");
            }
        }
    }
}

fn decode_value(column: &str, value: ValueRef<'_>) -> GatewayResult<SqlValue> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(v) => Ok(SqlValue::Integer(v)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| SqlValue::Text(s.to_string()))
            .map_err(|e| GatewayError::decode(column, e)),
        ValueRef::Real(v) => Ok(SqlValue::Text(v.to_string())),
        ValueRef::Blob(_) => Err(GatewayError::decode(column, "blob values are not supported")),
    }
}

fn map_error(sql: &str, error: rusqlite::Error) -> GatewayError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        if matches!(
            failure.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::OutOfMemory
                | ErrorCode::InternalMalfunction
        ) {
            return GatewayError::Connection(error.to_string());
        }
    }
    GatewayError::Statement {
        sql: sql.to_string(),
        message: error.to_string(),
    }
}
