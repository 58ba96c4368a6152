//! Base model module.
//!
//! Common columns shared by every entity, map conversion helpers and a
//! generic repository that hides soft-deleted rows.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, MySqlPool};

use crate::error::{AppError, AppResult};

/// Columns every table carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ModelBase {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl ModelBase {
    /// A fresh, not yet persisted row.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
        self.updated_at = Utc::now();
    }

    pub fn restore(&mut self) {
        self.is_deleted = false;
        self.updated_at = Utc::now();
    }
}

impl Default for ModelBase {
    fn default() -> Self {
        Self::new()
    }
}

/// A row type stored in its own table.
pub trait Entity: for<'r> FromRow<'r, MySqlRow> + Send + Unpin {
    /// Table name. Must satisfy [`validate_identifier`].
    const TABLE: &'static str;

    fn base(&self) -> &ModelBase;

    fn base_mut(&mut self) -> &mut ModelBase;
}

/// Lower-cased type name without its module path, e.g. `Customer` -> `customer`.
pub fn default_table_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_lowercase()
}

/// Checks that `name` is safe to interpolate into SQL as a table or column name.
pub fn validate_identifier(name: &str) -> AppResult<()> {
    let valid = (1..=64).contains(&name.len())
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid identifier: '{name}'")))
    }
}

/// Serializes a model into a field map.
pub fn to_map<T: Serialize>(model: &T) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!(
            "Model serialized to a non-object value: {other}"
        ))),
    }
}

/// Applies the entries of `data` whose keys are existing fields of `model`.
/// Unknown keys are ignored.
pub fn update_from_map<T>(model: &mut T, data: &Map<String, Value>) -> AppResult<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut current = to_map(model)?;
    for (key, value) in data {
        if let Some(slot) = current.get_mut(key) {
            *slot = value.clone();
        }
    }
    *model = serde_json::from_value(Value::Object(current))?;
    Ok(())
}

/// Data access for any [`Entity`]. Soft-deleted rows are never returned.
pub struct Repository<E>(PhantomData<E>);

impl<E: Entity> Repository<E> {
    fn table() -> AppResult<&'static str> {
        validate_identifier(E::TABLE)?;
        Ok(E::TABLE)
    }

    /// Finds a row by its ID.
    pub async fn get_by_id(pool: &MySqlPool, id: i64) -> AppResult<Option<E>> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ? AND is_deleted = 0 LIMIT 1",
            Self::table()?
        );
        let row = sqlx::query_as::<_, E>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(row)
    }

    /// Lists rows in ID order, skipping `skip` and returning at most `limit`.
    pub async fn get_all(pool: &MySqlPool, skip: u64, limit: u64) -> AppResult<Vec<E>> {
        let sql = format!(
            "SELECT * FROM {} WHERE is_deleted = 0 ORDER BY id LIMIT ? OFFSET ?",
            Self::table()?
        );
        let rows = sqlx::query_as::<_, E>(&sql)
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
            .await?;

        Ok(rows)
    }

    /// Counts rows that are not soft-deleted.
    pub async fn count(pool: &MySqlPool) -> AppResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE is_deleted = 0",
            Self::table()?
        );
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await?;

        Ok(count)
    }

    /// Marks a row as deleted. Returns `false` if no live row had that ID.
    pub async fn soft_delete_by_id(pool: &MySqlPool, id: i64) -> AppResult<bool> {
        let sql = format!(
            "UPDATE {} SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
            Self::table()?
        );
        let result = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
