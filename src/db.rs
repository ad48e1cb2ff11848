//! SQL Server Access
//!
//! The database seam. Production uses tiberius against SQL Server; tests
//! plug in their own [`Database`]. Execution only accepts [`ValidatedSql`],
//! so nothing reaches a connection without passing the guard.

use crate::error::{GenieError, Result};
use crate::guard::ValidatedSql;
use crate::schema::{
    CatalogColumn, CatalogTable, ColumnInfo, DatabaseSchema, COLUMNS_QUERY, TABLES_QUERY,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type MssqlClient = Client<Compat<TcpStream>>;

/// Rows of a guarded query, ready for JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Reads tables, views and their columns from the catalog.
    async fn load_schema(&self) -> Result<DatabaseSchema>;

    /// Runs a guarded statement and returns at most `max_rows` rows.
    async fn execute(&self, sql: &ValidatedSql, max_rows: usize) -> Result<QueryResult>;
}

#[derive(Clone)]
pub struct MssqlConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

impl std::fmt::Debug for MssqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl MssqlConfig {
    fn tiberius_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.application_name("sqlgenie");
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));
        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if self.trust_server_certificate {
            config.trust_cert();
        }
        config
    }
}

/// Opens a fresh connection per call; the server is the only state.
pub struct MssqlDatabase {
    config: MssqlConfig,
}

impl MssqlDatabase {
    pub fn new(config: MssqlConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<MssqlClient> {
        let config = self.config.tiberius_config();
        let addr = config.get_addr();

        let tcp = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                GenieError::Database(format!(
                    "Connection to {}:{} timed out",
                    self.config.host, self.config.port
                ))
            })?
            .map_err(|e| {
                GenieError::Database(format!(
                    "Failed to connect to {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write()).await?;
        debug!(host = %self.config.host, database = %self.config.database, "Connected to SQL Server");
        Ok(client)
    }

    /// Applies the query timeout to a whole connect-and-query round trip.
    async fn with_timeout<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.query_timeout, work)
            .await
            .map_err(|_| GenieError::QueryTimeout(self.config.query_timeout.as_secs()))?
    }
}

#[async_trait]
impl Database for MssqlDatabase {
    async fn load_schema(&self) -> Result<DatabaseSchema> {
        self.with_timeout(async {
            let mut client = self.connect().await?;

            let table_rows = client.simple_query(TABLES_QUERY).await?.into_first_result().await?;
            let tables = table_rows
                .iter()
                .map(|row| -> Result<CatalogTable> {
                    Ok(CatalogTable {
                        schema: text_at(row, 0)?,
                        name: text_at(row, 1)?,
                        table_type: text_at(row, 2)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let column_rows = client.simple_query(COLUMNS_QUERY).await?.into_first_result().await?;
            let columns = column_rows
                .iter()
                .map(|row| -> Result<CatalogColumn> {
                    Ok(CatalogColumn {
                        table_schema: text_at(row, 0)?,
                        table_name: text_at(row, 1)?,
                        column: ColumnInfo {
                            name: text_at(row, 2)?,
                            data_type: text_at(row, 3)?,
                            is_nullable: text_at(row, 4)?.eq_ignore_ascii_case("YES"),
                            max_length: row.try_get::<i32, _>(5)?,
                            precision: row.try_get::<i32, _>(6)?,
                            scale: row.try_get::<i32, _>(7)?,
                        },
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let schema = DatabaseSchema::from_catalog(tables, columns);
            info!(tables = schema.tables.len(), "Loaded database schema");
            Ok(schema)
        })
        .await
    }

    async fn execute(&self, sql: &ValidatedSql, max_rows: usize) -> Result<QueryResult> {
        let started = Instant::now();
        let result = self
            .with_timeout(async {
                let mut client = self.connect().await?;
                let mut stream = client.simple_query(sql.as_str()).await?;

                let columns: Vec<String> = stream
                    .columns()
                    .await?
                    .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default();

                // dropping the connection discards whatever the server still has
                let rows = read_capped(stream.into_row_stream(), max_rows)
                    .await?
                    .iter()
                    .map(row_to_json)
                    .collect();

                Ok(QueryResult { columns, rows })
            })
            .await?;

        info!(
            rows = result.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Executed guarded query"
        );
        Ok(result)
    }
}

fn text_at(row: &Row, idx: usize) -> Result<String> {
    row.try_get::<&str, _>(idx)?
        .map(str::to_string)
        .ok_or_else(|| GenieError::Database(format!("Unexpected NULL in catalog column {}", idx)))
}

/// Pulls at most `max_rows` items and leaves the rest of the stream unread.
async fn read_capped<S, T, E>(mut stream: S, max_rows: usize) -> Result<Vec<T>>
where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
    GenieError: From<E>,
{
    let mut rows = Vec::new();
    while rows.len() < max_rows {
        match stream.try_next().await? {
            Some(row) => rows.push(row),
            None => break,
        }
    }
    Ok(rows)
}

pub fn row_to_json(row: &Row) -> Vec<serde_json::Value> {
    row.cells().map(|(_, data)| cell_to_json(data)).collect()
}

/// Converts one cell into a JSON value. Temporal types become ISO-8601
/// strings, binary becomes `0x`-prefixed hex and exact numerics keep their
/// decimal text.
pub fn cell_to_json(data: &ColumnData<'static>) -> serde_json::Value {
    use serde_json::Value;

    match data {
        ColumnData::U8(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|f| Value::from(f as f64)).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .as_ref()
            .map(|s| Value::from(s.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v.map(|g| Value::from(g.to_string())).unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v.map(|n| Value::from(n.to_string())).unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|bytes| {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                Value::from(format!("0x{}", hex))
            })
            .unwrap_or(Value::Null),
        ColumnData::Xml(v) => v
            .as_deref()
            .map(|xml| Value::from(AsRef::<str>::as_ref(xml)))
            .unwrap_or(Value::Null),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal(NaiveDateTime::from_sql(data), |dt| {
                dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
            })
        }
        ColumnData::Date(_) => temporal(NaiveDate::from_sql(data), |d| d.to_string()),
        ColumnData::Time(_) => temporal(NaiveTime::from_sql(data), |t| t.to_string()),
        ColumnData::DateTimeOffset(_) => {
            temporal(DateTime::<FixedOffset>::from_sql(data), |dt| dt.to_rfc3339())
        }
        #[allow(unreachable_patterns)]
        other => Value::from(format!("{:?}", other)),
    }
}

fn temporal<T>(
    value: std::result::Result<Option<T>, tiberius::error::Error>,
    render: impl Fn(T) -> String,
) -> serde_json::Value {
    match value {
        Ok(Some(v)) => serde_json::Value::from(render(v)),
        Ok(None) => serde_json::Value::Null,
        Err(e) => serde_json::Value::from(format!("<unreadable: {}>", e)),
    }
}
