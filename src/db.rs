//! Record store: executes a [`QueryDescriptor`] against SQL Server.
//!
//! The pool is an owned value built once at startup and handed to the HTTP layer
//! behind the [`RecordStore`] trait, so handlers never touch process-wide state.

use crate::config::DatabaseConfig;
use crate::query_compiler::{placeholder_spans, ParamValue, QueryDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// One result row keyed by column name
pub type Record = Map<String, Value>;

pub type MssqlClient = Client<Compat<TcpStream>>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sql server error: {0}")]
    Sql(#[from] tiberius::error::Error),

    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,
}

impl From<bb8::RunError<DbError>> for DbError {
    fn from(err: bb8::RunError<DbError>) -> Self {
        match err {
            bb8::RunError::User(e) => e,
            bb8::RunError::TimedOut => DbError::PoolTimeout,
        }
    }
}

/// Anything that can run a compiled search and hand back rows
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<Vec<Record>, DbError>;
}

/// bb8 connection manager for tiberius clients
pub struct MssqlConnectionManager {
    config: Config,
}

impl MssqlConnectionManager {
    pub fn new(database: &DatabaseConfig) -> Self {
        let mut config = Config::new();
        config.host(&database.host);
        config.port(database.port);
        config.database(&database.name);
        config.application_name("station-explorer");
        config.authentication(AuthMethod::sql_server(&database.user, &database.password));
        if database.trust_cert {
            config.trust_cert();
        }
        config.encryption(if database.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        Self { config }
    }
}

impl bb8::ManageConnection for MssqlConnectionManager {
    type Connection = MssqlClient;
    type Error = DbError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let mut client = Client::connect(self.config.clone(), tcp.compat_write()).await?;
        // session level; quoted identifiers in generated queries depend on it
        client
            .simple_query("SET QUOTED_IDENTIFIER ON")
            .await?
            .into_results()
            .await?;
        debug!(addr = %self.config.get_addr(), "opened sql server connection");
        Ok(client)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    // tiberius has no synchronous liveness check; checkout runs is_valid instead
    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Pooled SQL Server store
pub struct MssqlStore {
    pool: bb8::Pool<MssqlConnectionManager>,
}

impl MssqlStore {
    pub async fn connect(database: &DatabaseConfig) -> Result<Self, DbError> {
        let manager = MssqlConnectionManager::new(database);
        let pool = bb8::Pool::builder()
            .retry_connection(true)
            .test_on_check_out(true)
            .max_size(database.pool_max)
            .min_idle(Some(database.pool_min))
            .idle_timeout(Some(Duration::from_millis(database.idle_timeout_ms)))
            .connection_timeout(Duration::from_millis(database.connect_timeout_ms))
            .build(manager)
            .await?;

        info!(
            "Initialized SQL Server pool for {}:{}/{} with {} max connections",
            database.host, database.port, database.name, database.pool_max
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for MssqlStore {
    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<Vec<Record>, DbError> {
        let (sql, values) = to_positional(descriptor);
        let mut query = Query::new(sql);
        for value in values {
            match value {
                ParamValue::Int(v) => query.bind(*v),
                ParamValue::Text(v) => query.bind(v.clone()),
                ParamValue::Timestamp(v) => query.bind(v.naive_utc()),
            }
        }

        let mut conn = self.pool.get().await?;
        let rows = query.query(&mut *conn).await?.into_first_result().await?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }
}

/// Rewrite named `@placeholders` into tiberius positional `@P1..@Pn`.
///
/// Returns the rewritten text and the values in binding order. Names that are not
/// in the parameter map are left untouched.
pub fn to_positional(descriptor: &QueryDescriptor) -> (String, Vec<&ParamValue>) {
    let text = descriptor.query_text.as_str();
    let mut sql = String::with_capacity(text.len());
    let mut values = Vec::with_capacity(descriptor.parameters.len());

    let mut last = 0;
    for (span, name) in placeholder_spans(text) {
        sql.push_str(&text[last..span.start]);
        match descriptor.parameters.get(name) {
            Some(value) => {
                values.push(value);
                sql.push_str(&format!("@P{}", values.len()));
            }
            None => sql.push_str(&text[span.clone()]),
        }
        last = span.end;
    }
    sql.push_str(&text[last..]);

    (sql, values)
}

fn row_to_record(row: Row) -> Record {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, column_to_json(data)))
        .collect()
}

/// Map a SQL Server value to JSON. Temporal values become ISO-8601 strings,
/// `datetime`/`datetime2` are treated as UTC.
fn column_to_json(data: ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(Value::from),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.map(|s| Value::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.map(|b| Value::String(hex::encode(b))),
        ColumnData::Numeric(v) => v.map(|n| Value::from(f64::from(n))),
        ColumnData::Xml(v) => v.map(|x| Value::String(x.into_owned().into_string())),
        data @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => NaiveDateTime::from_sql(&data)
            .ok()
            .flatten()
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())),
        data @ ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(&data)
            .ok()
            .flatten()
            .map(|dt| Value::String(dt.to_rfc3339())),
        data @ ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string())),
        data @ ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string())),
        #[allow(unreachable_patterns)]
        _ => None,
    };
    value.unwrap_or(Value::Null)
}
