//! PostgreSQL backend over a sqlx connection pool
//!
//! Statements arrive with `@name` placeholders and are rewritten to `$n`
//! before binding. Stored procedures are invoked with named arguments:
//! row-returning procedures through `SELECT * FROM name(arg => $1)`, the rest
//! through `CALL name(arg => $1)`.
//!
//! Values bind with their natural Postgres types: text as `text`, timestamps
//! as `timestamptz`, dates as `date`, guids as `uuid`. A NULL is sent without
//! a declared type so the server infers it from the surrounding expression.
//! Compare temporal or uuid columns against typed filter literals
//! (`2024-03-01`, `guid'...'`), not quoted strings.

use std::time::Duration;

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::pool::PoolConnection;
use sqlx::postgres::types::{Oid, PgInterval, PgTimeTz};
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgPoolOptions, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};

use crate::backend::{Command, CommandKind, Connection, Connector};
use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::error::{DatabaseError, DatabaseErrorKind, DatabaseOperation, Error, Result};
use crate::query::{Dialect, Parameters, SqlValue};
use crate::row::Row;

/// Create a PostgreSQL connection pool with retry logic
///
/// Uses exponential backoff between attempts, starting at
/// `retry_delay_secs` and doubling each time, for up to `max_retries` retries.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Database connection pool created: max={}, min={}",
                        config.max_connections,
                        config.min_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to database after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));

                tracing::warn!(
                    "Database connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Attempt to create a database pool (single try)
async fn try_create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| {
            classify_error(DatabaseOperation::Connect, &e).add_context(format!(
                "{} ({})",
                config.redacted_url(),
                connection_hint(&e)
            ))
        })?;

    Ok(pool)
}

/// Short operator hint for a connection failure
fn connection_hint(err: &sqlx::Error) -> &'static str {
    use sqlx::Error as E;
    match err {
        E::Configuration(_) => "check the connection URL format",
        E::Io(_) => "check network connectivity",
        E::Tls(_) => "check TLS certificate configuration",
        E::PoolTimedOut => "database may be overloaded",
        E::Database(_) => "check credentials and permissions",
        _ => "connection error",
    }
}

/// Categorize a sqlx error for the operation that produced it
pub fn classify_error(operation: DatabaseOperation, err: &sqlx::Error) -> DatabaseError {
    use sqlx::Error as E;
    match err {
        E::PoolTimedOut => DatabaseError::pool_exhausted("Connection pool timed out"),
        E::PoolClosed => DatabaseError::connection_failed("Connection pool is closed"),
        E::WorkerCrashed => DatabaseError::connection_failed("Database worker crashed"),
        E::Io(e) => DatabaseError::new(operation, DatabaseErrorKind::ConnectionFailed, e.to_string()),
        E::Tls(e) => DatabaseError::new(
            operation,
            DatabaseErrorKind::ConnectionFailed,
            format!("TLS error: {}", e),
        ),
        E::Configuration(e) => {
            DatabaseError::new(operation, DatabaseErrorKind::Configuration, e.to_string())
        }
        E::TypeNotFound { type_name } => DatabaseError::new(
            operation,
            DatabaseErrorKind::TypeConversion,
            format!("Type not found: {}", type_name),
        ),
        E::ColumnDecode { index, source } => DatabaseError::new(
            operation,
            DatabaseErrorKind::TypeConversion,
            format!("Failed to decode column {}: {}", index, source),
        ),
        E::Decode(e) => {
            DatabaseError::new(operation, DatabaseErrorKind::TypeConversion, e.to_string())
        }
        E::Database(db_err) => {
            let kind = if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                DatabaseErrorKind::ConstraintViolation
            } else {
                DatabaseErrorKind::QueryFailed
            };
            DatabaseError::new(operation, kind, db_err.to_string())
        }
        other => DatabaseError::new(operation, DatabaseErrorKind::QueryFailed, other.to_string()),
    }
}

/// Connector backed by a sqlx `PgPool`
#[derive(Debug, Clone)]
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the pool described by `config`
    pub async fn connect_with(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    /// The underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify_error(DatabaseOperation::PoolAcquire, &e))?;
        Ok(PgConnection {
            conn,
            in_transaction: false,
        })
    }
}

impl Database<PgConnector> {
    /// Connect a PostgreSQL-backed facade from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let connector = PgConnector::connect_with(config).await?;
        Ok(Self::postgres(connector, config))
    }

    /// Facade over an existing connector
    ///
    /// Statements are always rendered for [`Dialect::Postgres`]; a different
    /// configured dialect is logged and ignored.
    pub fn postgres(connector: PgConnector, config: &DatabaseConfig) -> Self {
        if config.dialect != Dialect::Postgres {
            tracing::warn!(
                configured = %config.dialect,
                "Ignoring configured dialect, the PostgreSQL backend renders postgres statements"
            );
        }
        Database::new(connector, Dialect::Postgres, config.timeout())
    }
}

/// A pooled PostgreSQL connection
pub struct PgConnection {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl PgConnection {
    async fn control(&mut self, operation: DatabaseOperation, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| {
                let err = classify_error(operation, &e);
                Error::from(DatabaseError::transaction_failed(operation, err.message))
            })?;
        Ok(())
    }
}

impl Connection for PgConnection {
    async fn fetch(&mut self, command: &Command) -> Result<Vec<Row>> {
        let (sql, values) = prepare(command, true)?;
        let rows = bind_all(sqlx::query(&sql), values)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| classify_error(operation_for(command, DatabaseOperation::Query), &e))?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, command: &Command) -> Result<u64> {
        let (sql, values) = prepare(command, false)?;
        let done = bind_all(sqlx::query(&sql), values)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify_error(operation_for(command, DatabaseOperation::Execute), &e))?;
        Ok(done.rows_affected())
    }

    async fn begin(&mut self) -> Result<()> {
        // Set first: if BEGIN is cancelled mid-flight the server state is
        // unknown and the connection must not be reused.
        self.in_transaction = true;
        self.control(DatabaseOperation::Begin, "BEGIN").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.control(DatabaseOperation::Commit, "COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let result = self.control(DatabaseOperation::Rollback, "ROLLBACK").await;
        if result.is_ok() {
            self.in_transaction = false;
        }
        result
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        // A connection abandoned mid-transaction must not go back to the pool.
        if self.in_transaction {
            tracing::warn!("Closing connection dropped with an open transaction");
            self.conn.close_on_drop();
        }
    }
}

fn operation_for(command: &Command, default: DatabaseOperation) -> DatabaseOperation {
    match command.kind {
        CommandKind::StoredProcedure => DatabaseOperation::Procedure,
        CommandKind::Text => default,
    }
}

/// Positional SQL and ordered values for a command
fn prepare(command: &Command, returns_rows: bool) -> Result<(String, Vec<SqlValue>)> {
    match command.kind {
        CommandKind::Text => command.parameters.bind_positional(&command.text),
        CommandKind::StoredProcedure => Ok(procedure_call(
            &command.text,
            &command.parameters,
            returns_rows,
        )),
    }
}

fn procedure_call(
    name: &str,
    parameters: &Parameters,
    returns_rows: bool,
) -> (String, Vec<SqlValue>) {
    let mut arguments = Vec::with_capacity(parameters.len());
    let mut values = Vec::with_capacity(parameters.len());
    for (i, (param, value)) in parameters.iter().enumerate() {
        arguments.push(format!("{} => ${}", param, i + 1));
        values.push(value.clone());
    }
    let sql = if returns_rows {
        format!("SELECT * FROM {}({})", name, arguments.join(", "))
    } else {
        format!("CALL {}({})", name, arguments.join(", "))
    };
    (sql, values)
}

fn bind_all(
    mut query: Query<'_, Postgres, PgArguments>,
    values: Vec<SqlValue>,
) -> Query<'_, Postgres, PgArguments> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(UntypedNull),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Int(n) => query.bind(n),
            SqlValue::Float(n) => query.bind(n),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Timestamp(t) => query.bind(t),
            SqlValue::Date(d) => query.bind(d),
            SqlValue::Uuid(u) => query.bind(u),
            SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
        };
    }
    query
}

/// NULL with an unspecified parameter type (OID 0)
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(
        &self,
        _buf: &mut PgArgumentBuffer,
    ) -> std::result::Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// How a result column is decoded, by Postgres type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Json,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    TimeTz,
    Interval,
    Bytea,
    Other,
}

fn column_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "BOOL" => ColumnKind::Bool,
        "INT2" => ColumnKind::Int2,
        "INT4" => ColumnKind::Int4,
        "INT8" => ColumnKind::Int8,
        "OID" => ColumnKind::Oid,
        "FLOAT4" => ColumnKind::Float4,
        "FLOAT8" => ColumnKind::Float8,
        "NUMERIC" => ColumnKind::Numeric,
        "JSON" | "JSONB" => ColumnKind::Json,
        "UUID" => ColumnKind::Uuid,
        "TIMESTAMPTZ" => ColumnKind::TimestampTz,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "TIMETZ" => ColumnKind::TimeTz,
        "INTERVAL" => ColumnKind::Interval,
        "BYTEA" => ColumnKind::Bytea,
        _ => ColumnKind::Other,
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = decode_value(row, index, column_kind(column.type_info().name()))
            .map_err(|e| Error::Database(classify_error(DatabaseOperation::Query, &e)))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_value(
    row: &PgRow,
    index: usize,
    kind: ColumnKind,
) -> std::result::Result<SqlValue, sqlx::Error> {
    let value = match kind {
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(index)?.map(SqlValue::Bool),
        ColumnKind::Int2 => row
            .try_get::<Option<i16>, _>(index)?
            .map(|n| SqlValue::Int(n.into())),
        ColumnKind::Int4 => row
            .try_get::<Option<i32>, _>(index)?
            .map(|n| SqlValue::Int(n.into())),
        ColumnKind::Int8 => row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Int),
        ColumnKind::Oid => row
            .try_get::<Option<Oid>, _>(index)?
            .map(|oid| SqlValue::Int(oid.0.into())),
        ColumnKind::Float4 => row
            .try_get::<Option<f32>, _>(index)?
            .map(|n| SqlValue::Float(n.into())),
        ColumnKind::Float8 => row.try_get::<Option<f64>, _>(index)?.map(SqlValue::Float),
        // Exact decimal text; f64 would lose precision.
        ColumnKind::Numeric => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)?
            .map(|d| SqlValue::Text(d.to_string())),
        ColumnKind::Json => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(SqlValue::Json),
        ColumnKind::Uuid => row.try_get::<Option<uuid::Uuid>, _>(index)?.map(SqlValue::Uuid),
        ColumnKind::TimestampTz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(SqlValue::from),
        ColumnKind::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|t| SqlValue::Text(t.to_string())),
        ColumnKind::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(SqlValue::Date),
        ColumnKind::Time => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map(|t| SqlValue::Text(t.to_string())),
        ColumnKind::TimeTz => row
            .try_get::<Option<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>, _>(index)?
            .map(|t| SqlValue::Text(format!("{}{}", t.time, t.offset))),
        ColumnKind::Interval => row
            .try_get::<Option<PgInterval>, _>(index)?
            .map(|i| SqlValue::Text(interval_text(i.months, i.days, i.microseconds))),
        ColumnKind::Bytea => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(|b| SqlValue::Text(hex_bytes(&b))),
        ColumnKind::Other => decode_other(row, index)?,
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

// Text-like columns (varchar, citext, enums, xml) decode as strings; any
// other binary value is kept as `\x` hex.
fn decode_other(row: &PgRow, index: usize) -> std::result::Result<Option<SqlValue>, sqlx::Error> {
    if let Ok(text) = row.try_get_unchecked::<Option<String>, _>(index) {
        return Ok(text.map(SqlValue::Text));
    }
    Ok(row
        .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
        .map(|b| SqlValue::Text(hex_bytes(&b))))
}

/// ISO 8601 duration text, e.g. `P14M3DT4.5S`
fn interval_text(months: i32, days: i32, microseconds: i64) -> String {
    let sign = if microseconds < 0 { "-" } else { "" };
    let micros = microseconds.unsigned_abs();
    let (whole, fraction) = (micros / 1_000_000, micros % 1_000_000);
    let seconds = if fraction == 0 {
        format!("{}{}", sign, whole)
    } else {
        let fraction = format!("{:06}", fraction);
        format!("{}{}.{}", sign, whole, fraction.trim_end_matches('0'))
    };
    format!("P{}M{}DT{}S", months, days, seconds)
}

/// Postgres hex escape form of a byte string
fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure_call_text() {
        let params = Parameters::new().with("period", 7_i64).with("dry_run", true);
        let (sql, values) = procedure_call("billing.close_period", &params, true);
        assert_eq!(
            sql,
            "SELECT * FROM billing.close_period(dry_run => $1, period => $2)"
        );
        assert_eq!(values, vec![SqlValue::Bool(true), SqlValue::Int(7)]);

        let (sql, _) = procedure_call("refresh", &Parameters::new(), false);
        assert_eq!(sql, "CALL refresh()");
    }

    #[test]
    fn test_prepare_text_command() {
        let command = Command::text("SELECT * FROM t WHERE a = @a AND b = @a")
            .with_parameters(Parameters::new().with("a", 1_i64));
        let (sql, values) = prepare(&command, true).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_classify_pool_errors() {
        assert_eq!(
            classify_error(DatabaseOperation::Query, &sqlx::Error::PoolTimedOut).kind,
            DatabaseErrorKind::PoolExhausted
        );
        assert_eq!(
            classify_error(DatabaseOperation::Query, &sqlx::Error::PoolClosed).kind,
            DatabaseErrorKind::ConnectionFailed
        );
        let decode = sqlx::Error::Decode("bad".into());
        let err = classify_error(DatabaseOperation::Scalar, &decode);
        assert_eq!(err.kind, DatabaseErrorKind::TypeConversion);
        assert_eq!(err.operation, DatabaseOperation::Scalar);
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(column_kind("NUMERIC"), ColumnKind::Numeric);
        assert_eq!(column_kind("TIME"), ColumnKind::Time);
        assert_eq!(column_kind("TIMETZ"), ColumnKind::TimeTz);
        assert_eq!(column_kind("BYTEA"), ColumnKind::Bytea);
        assert_eq!(column_kind("INTERVAL"), ColumnKind::Interval);
        assert_eq!(column_kind("JSONB"), ColumnKind::Json);
        assert_eq!(column_kind("TIMESTAMPTZ"), ColumnKind::TimestampTz);
        assert_eq!(column_kind("VARCHAR"), ColumnKind::Other);
        assert_eq!(column_kind("mood"), ColumnKind::Other);
    }

    #[test]
    fn test_interval_text() {
        assert_eq!(interval_text(14, 3, 4_500_000), "P14M3DT4.5S");
        assert_eq!(interval_text(0, 1, 0), "P0M1DT0S");
        assert_eq!(interval_text(0, 0, -1), "P0M0DT-0.000001S");
    }

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(hex_bytes(&[]), "\\x");
    }

    #[test]
    fn test_null_binds_without_declared_type() {
        let info = <UntypedNull as sqlx::Type<Postgres>>::type_info();
        assert_eq!(info.oid(), Some(Oid(0)));
    }

    #[test]
    fn test_typed_values_keep_their_type_through_binding() {
        let id = uuid::Uuid::parse_str("c56a4180-65aa-42ec-a945-5fd21dec0538").unwrap();
        let command = Command::text("SELECT * FROM t WHERE id = @id AND at > @at AND gone = @gone")
            .with_parameters(
                Parameters::new()
                    .with("id", id)
                    .with("at", chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
                    .with("gone", SqlValue::Null),
            );
        let (sql, values) = prepare(&command, true).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = $1 AND at > $2 AND gone = $3");
        assert_eq!(values[0], SqlValue::Uuid(id));
        assert!(matches!(values[1], SqlValue::Date(_)));
        assert_eq!(values[2], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_facade_renders_postgres_statements() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/sqlgate")
            .unwrap();
        let config = DatabaseConfig::default();
        assert_eq!(config.dialect, Dialect::SqlServer);

        let db = Database::postgres(PgConnector::new(pool), &config);
        assert_eq!(db.dialect(), Dialect::Postgres);
        assert_eq!(db.timeout(), config.timeout());
    }

    #[test]
    fn test_connection_hint() {
        assert_eq!(connection_hint(&sqlx::Error::PoolTimedOut), "database may be overloaded");
    }
}
