//! Generic data access service.
//!
//! Runs raw SQL against the pool and returns rows as JSON objects keyed by
//! column name.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::mysql::types::MySqlTime;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Decode, MySql, MySqlPool, Row as _, Type, TypeInfo};
use validator::{Validate, ValidationError};

use super::Service;
use crate::config::{read_only, with_transaction, IsolationLevel};
use crate::error::{AppError, AppResult};
use crate::models::validate_identifier;
use crate::wrap::{AsyncOp, AsyncOperation, OperationExt};

/// A result row, keyed by column name.
pub type Row = Map<String, Value>;

const TABLE_INFO_SQL: &str = r"
    SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_COMMENT
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
";

const TABLE_LIST_SQL: &str = r"
    SELECT TABLE_NAME, TABLE_COMMENT, CREATE_TIME, UPDATE_TIME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME
";

fn default_limit() -> u32 {
    100
}

fn validate_table_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name).map_err(|_| {
        ValidationError::new("table_name").with_message("invalid table name".into())
    })
}

/// One page of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TablePage {
    #[validate(custom(function = "validate_table_name"))]
    pub table_name: String,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    pub limit: u32,

    #[serde(default)]
    pub offset: u64,
}

impl TablePage {
    /// First page of `table_name` with the default size.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            limit: default_limit(),
            offset: 0,
        }
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// Data service.
///
/// Constructed without a pool it still initializes, but every query fails
/// with [`AppError::NotInitialized`].
#[derive(Debug, Clone)]
pub struct DataService {
    pool: Option<MySqlPool>,
}

impl DataService {
    pub const fn new(pool: Option<MySqlPool>) -> Self {
        Self { pool }
    }

    pub const fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    fn pool(&self) -> AppResult<&MySqlPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| AppError::NotInitialized("DataService has no database pool".to_string()))
    }

    /// Runs a query with positional `?` parameters on a read-only session
    /// and returns every row.
    pub async fn execute_query(&self, sql: &str, params: &[Value]) -> AppResult<Vec<Row>> {
        let pool = self.pool()?;
        let sql = sql.to_string();
        let params = params.to_vec();

        read_only(pool, move |conn| {
            Box::pin(async move {
                let rows = bind_all(sqlx::query(&sql), &params)
                    .fetch_all(&mut *conn)
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Query failed"))?;
                rows.iter().map(row_to_map).collect::<AppResult<Vec<Row>>>()
            })
        })
        .await
    }

    /// Runs a statement in its own transaction and returns the number of
    /// affected rows. Nothing is committed when the statement fails.
    pub async fn execute_update(&self, sql: &str, params: &[Value]) -> AppResult<u64> {
        self.execute_update_with(None, sql, params).await
    }

    /// Like [`Self::execute_update`], at the given isolation level.
    pub async fn execute_update_with(
        &self,
        isolation: Option<IsolationLevel>,
        sql: &str,
        params: &[Value],
    ) -> AppResult<u64> {
        let pool = self.pool()?;
        let sql = sql.to_string();
        let params = params.to_vec();

        with_transaction(pool, isolation, move |conn| {
            Box::pin(async move {
                let result = bind_all(sqlx::query(&sql), &params)
                    .execute(&mut *conn)
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Update failed"))?;
                Ok::<_, AppError>(result.rows_affected())
            })
        })
        .await
    }

    /// Column definitions of `table_name` in ordinal order.
    pub async fn get_table_info(&self, table_name: &str) -> AppResult<Vec<Row>> {
        validate_identifier(table_name)?;
        self.execute_query(TABLE_INFO_SQL, &[Value::from(table_name)])
            .await
    }

    /// Tables of the current schema.
    pub async fn get_table_list(&self) -> AppResult<Vec<Row>> {
        self.execute_query(TABLE_LIST_SQL, &[]).await
    }

    /// One page of rows. The page is validated before any query runs.
    pub async fn get_table_data(&self, page: TablePage) -> AppResult<Vec<Row>> {
        AsyncOp::new("DataService::get_table_data", |page: TablePage| {
            self.fetch_page(page)
        })
        .with_doc("Reads one page of rows from a table.")
        .validated()
        .call_async(page)
        .await
    }

    async fn fetch_page(&self, page: TablePage) -> AppResult<Vec<Row>> {
        let sql = format!("SELECT * FROM `{}` LIMIT ? OFFSET ?", page.table_name);
        self.execute_query(&sql, &[Value::from(page.limit), Value::from(page.offset)])
            .await
    }

    /// Number of rows in `table_name`.
    pub async fn count_table_records(&self, table_name: &str) -> AppResult<i64> {
        validate_identifier(table_name)?;
        let pool = self.pool()?;
        let sql = format!("SELECT COUNT(*) FROM `{table_name}`");
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await?;

        Ok(count)
    }
}

#[async_trait]
impl Service for DataService {
    fn name(&self) -> &'static str {
        "DataService"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        if self.pool.is_none() {
            tracing::warn!("DataService initialized without a database pool");
        }
        tracing::info!("DataService initialized");
        Ok(())
    }

    async fn cleanup(&mut self) -> AppResult<()> {
        tracing::info!("DataService cleaned up");
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else {
                    query.bind(n.as_f64())
                }
            }
            Value::String(s) => query.bind(s.as_str()),
            Value::Array(_) | Value::Object(_) => query.bind(param.to_string()),
        };
    }
    query
}

fn decode<'r, T>(row: &'r MySqlRow, index: usize, convert: impl FnOnce(T) -> Value) -> AppResult<Value>
where
    T: Decode<'r, MySql> + Type<MySql>,
{
    Ok(row
        .try_get::<Option<T>, _>(index)?
        .map_or(Value::Null, convert))
}

/// Decodes without the column type check, for types whose wire format is
/// known but which the Rust type does not declare as compatible.
fn decode_unchecked<'r, T>(
    row: &'r MySqlRow,
    index: usize,
    convert: impl FnOnce(T) -> Value,
) -> AppResult<Value>
where
    T: Decode<'r, MySql> + Type<MySql>,
{
    Ok(row
        .try_get_unchecked::<Option<T>, _>(index)?
        .map_or(Value::Null, convert))
}

/// `BIT(n)` values arrive as big-endian bytes.
fn bits_to_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn lossy_text(bytes: &[u8]) -> Value {
    Value::from(String::from_utf8_lossy(bytes).into_owned())
}

fn row_to_map(row: &MySqlRow) -> AppResult<Row> {
    let mut map = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let type_name = column.type_info().name();
        let value = match type_name {
            "NULL" => Value::Null,
            "BOOLEAN" => decode(row, index, Value::Bool)?,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                decode(row, index, |v: i64| Value::from(v))?
            }
            name if name.ends_with("UNSIGNED") => decode(row, index, |v: u64| Value::from(v))?,
            "YEAR" => decode_unchecked(row, index, |v: u16| Value::from(v))?,
            "BIT" => decode_unchecked(row, index, |v: Vec<u8>| Value::from(bits_to_u64(&v)))?,
            "FLOAT" | "DOUBLE" => decode(row, index, |v: f64| Value::from(v))?,
            "JSON" => decode(row, index, std::convert::identity::<Value>)?,
            "DATETIME" | "TIMESTAMP" => decode(row, index, |v: NaiveDateTime| {
                Value::from(v.format("%Y-%m-%d %H:%M:%S").to_string())
            })?,
            "DATE" => decode(row, index, |v: NaiveDate| Value::from(v.to_string()))?,
            // TIME spans -838:59:59 to 838:59:59, not just a time of day.
            "TIME" => decode(row, index, |v: MySqlTime| Value::from(v.to_string()))?,
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                decode(row, index, |v: Vec<u8>| lossy_text(&v))?
            }
            // DECIMAL, text and anything else arrive as text on the wire;
            // binary leftovers are kept as lossy text.
            _ => match row.try_get_unchecked::<Option<String>, _>(index) {
                Ok(text) => text.map_or(Value::Null, Value::from),
                Err(_) => decode_unchecked(row, index, |v: Vec<u8>| lossy_text(&v))?,
            },
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============ TablePage ============

    #[test]
    fn test_table_page_defaults() {
        let page = TablePage::new("orders");
        assert_eq!(page.limit, 100);
        assert_eq!(page.offset, 0);
        assert!(page.validate().is_ok());
    }

    #[test]
    fn test_table_page_deserialize_defaults() {
        let page: TablePage = serde_json::from_str(r#"{"table_name": "orders"}"#).unwrap();
        assert_eq!(page, TablePage::new("orders"));
    }

    #[test]
    fn test_table_page_rejects_bad_table_name() {
        let errors = TablePage::new("orders; DROP TABLE x").validate().unwrap_err();
        assert!(errors.field_errors().contains_key("table_name"));
    }

    #[test]
    fn test_table_page_rejects_limit_out_of_range() {
        assert!(TablePage::new("orders").with_limit(0).validate().is_err());
        assert!(TablePage::new("orders").with_limit(1001).validate().is_err());
        assert!(TablePage::new("orders").with_limit(1000).validate().is_ok());
    }

    // ============ row decoding ============

    #[test]
    fn test_bits_to_u64() {
        assert_eq!(bits_to_u64(&[]), 0);
        assert_eq!(bits_to_u64(&[0x01]), 1);
        assert_eq!(bits_to_u64(&[0x01, 0x00]), 256);
        assert_eq!(bits_to_u64(&[0xFF; 8]), u64::MAX);
    }

    #[test]
    fn test_lossy_text() {
        assert_eq!(lossy_text(b"abc"), Value::from("abc"));
        assert_eq!(lossy_text(&[0xE8, 0x07]), Value::from("\u{FFFD}\u{7}"));
    }

    // ============ DataService without a pool ============

    #[tokio::test]
    async fn test_queries_fail_without_pool() {
        let service = DataService::new(None);
        assert!(!service.has_pool());

        assert!(matches!(
            service.execute_query("SELECT 1", &[]).await,
            Err(AppError::NotInitialized(_))
        ));
        assert!(matches!(
            service.execute_update("DELETE FROM t", &[]).await,
            Err(AppError::NotInitialized(_))
        ));
        assert!(matches!(
            service.get_table_list().await,
            Err(AppError::NotInitialized(_))
        ));
        assert!(matches!(
            service.count_table_records("orders").await,
            Err(AppError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_table_name_checked_before_pool() {
        let service = DataService::new(None);
        assert!(matches!(
            service.get_table_info("bad name").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.count_table_records("x`y").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_get_table_data_validates_page() {
        let service = DataService::new(None);

        let result = service.get_table_data(TablePage::new("orders").with_limit(0)).await;
        assert!(matches!(result, Err(AppError::Validation(msg)) if msg.contains("limit")));

        let result = service.get_table_data(TablePage::new("orders")).await;
        assert!(matches!(result, Err(AppError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_service_lifecycle_without_pool() {
        let mut service = DataService::new(None);
        assert_eq!(service.name(), "DataService");
        service.initialize().await.unwrap();
        service.cleanup().await.unwrap();
    }
}
